use billrunner::application::pipeline::Pipeline;
use billrunner::config::Settings;
use billrunner::domain::ports::SharedLedgerStore;
use billrunner::infrastructure::in_memory::InMemoryLedgerStore;
use billrunner::interfaces::csv::command_reader::CommandReader;
use billrunner::interfaces::csv::report_writer::ReportWriter;
use billrunner::telemetry;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script CSV file (op,actor,role,target,amount,fee,method,detail)
    script: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file; defaults to ./billrunner.toml when present
    #[arg(long)]
    config: Option<PathBuf>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&Path>) -> Result<SharedLedgerStore> {
    use billrunner::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using RocksDB ledger");
            Ok(Arc::new(RocksDBStore::open(path)?))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&Path>) -> Result<SharedLedgerStore> {
    if let Some(path) = db_path {
        warn!(
            path = %path.display(),
            "built without storage-rocksdb; falling back to the in-memory ledger"
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    telemetry::init_tracing(&settings.log.level, settings.log.json);

    let store = open_store(cli.db_path.as_deref())?;
    let pipeline = Pipeline::builder(store)
        .share_policy(settings.share_policy()?)
        .maybe_eligibility_gate(settings.eligibility_gate()?)
        .build();

    let file = File::open(&cli.script).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, parsed) in reader.commands().enumerate() {
        // Header is line 1.
        let line = index + 2;
        match parsed {
            Ok(command) => {
                let op = format!("{:?}", command.command);
                if let Err(e) = command.apply(&pipeline).await {
                    if e.is_integrity_violation() {
                        error!(line, %op, error = %e, "command rejected");
                    } else {
                        warn!(line, %op, error = %e, kind = ?e.kind(), "command rejected");
                    }
                }
            }
            Err(e) => {
                warn!(line, error = %e, "unreadable command");
            }
        }
    }

    let requests = pipeline.requests.all().await?;
    let remittances = pipeline.earnings.remittances().await?;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_requests(&requests)?;
    writer.write_remittances(&remittances)?;

    Ok(())
}
