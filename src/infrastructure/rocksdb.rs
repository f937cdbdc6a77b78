use super::constraints::{self, TableView};
use crate::domain::actor::UserId;
use crate::domain::earning::{Earning, EarningId, Remittance};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{ChangeSet, Commit, LedgerStore};
use crate::domain::rating::Rating;
use crate::domain::request::{Request, RequestId};
use crate::domain::task::{Task, TaskId, TaskStatus};
use crate::error::{EntityKind, EntityRef, PipelineError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family holding the per-table auto-increment counters.
pub const CF_SEQUENCES: &str = "sequences";
pub const CF_REQUESTS: &str = "requests";
pub const CF_TASKS: &str = "tasks";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_EARNINGS: &str = "earnings";
pub const CF_REMITTANCES: &str = "remittances";
pub const CF_RATINGS: &str = "ratings";

const ALL_CFS: [&str; 7] = [
    CF_SEQUENCES,
    CF_REQUESTS,
    CF_TASKS,
    CF_PAYMENTS,
    CF_EARNINGS,
    CF_REMITTANCES,
    CF_RATINGS,
];

fn cf_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Request => CF_REQUESTS,
        EntityKind::Task => CF_TASKS,
        EntityKind::Payment => CF_PAYMENTS,
        EntityKind::Earning => CF_EARNINGS,
        EntityKind::Remittance => CF_REMITTANCES,
        EntityKind::Rating | EntityKind::Rider | EntityKind::Customer => CF_RATINGS,
    }
}

impl From<rocksdb::Error> for PipelineError {
    fn from(err: rocksdb::Error) -> Self {
        PipelineError::InternalError(Box::new(err))
    }
}

/// A persistent ledger using RocksDB.
///
/// Each table lives in its own Column Family keyed by the big-endian row id,
/// with rows stored as JSON. A commit is validated and then written as one
/// `WriteBatch`, so it lands entirely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PipelineError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, id: u32) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let row: T = serde_json::from_slice(&value)?;
            if keep(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn put_row<T: Serialize>(&self, batch: &mut WriteBatch, cf_name: &str, id: u32, row: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, id.to_be_bytes(), serde_json::to_vec(row)?);
        Ok(())
    }
}

impl TableView for RocksDBStore {
    fn stored_version(&self, entity: EntityRef) -> Result<Option<u32>> {
        let cf_name = cf_for(entity.kind);
        let version = match entity.kind {
            EntityKind::Request => self.get_row::<Request>(cf_name, entity.id)?.map(|r| r.version()),
            EntityKind::Task => self.get_row::<Task>(cf_name, entity.id)?.map(|t| t.version()),
            EntityKind::Payment => self.get_row::<Payment>(cf_name, entity.id)?.map(|p| p.version()),
            EntityKind::Earning => self.get_row::<Earning>(cf_name, entity.id)?.map(|e| e.version()),
            EntityKind::Remittance => self
                .get_row::<Remittance>(cf_name, entity.id)?
                .map(|r| r.version()),
            EntityKind::Rating => self.get_row::<Rating>(cf_name, entity.id)?.map(|r| r.version()),
            EntityKind::Rider | EntityKind::Customer => None,
        };
        Ok(version)
    }

    fn request_tasks(&self, request_id: RequestId) -> Result<Vec<Task>> {
        self.scan(CF_TASKS, |t: &Task| t.request_id() == request_id)
    }

    fn request_payments(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        self.scan(CF_PAYMENTS, |p: &Payment| p.request_id() == request_id)
    }

    fn task_earning(&self, task_id: TaskId) -> Result<Option<Earning>> {
        Ok(self
            .scan(CF_EARNINGS, |e: &Earning| e.task_id() == task_id)?
            .into_iter()
            .next())
    }

    fn task_rating(&self, task_id: TaskId) -> Result<Option<Rating>> {
        Ok(self
            .scan(CF_RATINGS, |r: &Rating| r.task_id() == task_id)?
            .into_iter()
            .next())
    }

    fn day_remittance(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>> {
        Ok(self
            .scan(CF_REMITTANCES, |r: &Remittance| {
                r.rider_id() == rider_id && r.remittance_date() == date
            })?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn allocate_id(&self, kind: EntityKind) -> Result<u32> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_SEQUENCES)?;
        let key = kind.as_str().as_bytes();
        let current = match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    PipelineError::InternalError(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("corrupt {} sequence", kind.as_str()),
                    )))
                })?;
                u32::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(cf, key, next.to_be_bytes())?;
        Ok(next)
    }

    async fn commit(&self, mut changes: ChangeSet) -> Result<Commit> {
        let _guard = self.write_lock.lock().await;
        let outcome = constraints::check(&changes, self)?;
        if outcome != Commit::Applied {
            return Ok(outcome);
        }

        changes.bump_versions();
        let mut batch = WriteBatch::default();
        for request in &changes.requests {
            self.put_row(&mut batch, CF_REQUESTS, request.id(), request)?;
        }
        for task in &changes.tasks {
            self.put_row(&mut batch, CF_TASKS, task.id(), task)?;
        }
        for payment in &changes.payments {
            self.put_row(&mut batch, CF_PAYMENTS, payment.id(), payment)?;
        }
        for earning in &changes.earnings {
            self.put_row(&mut batch, CF_EARNINGS, earning.id(), earning)?;
        }
        for remittance in &changes.remittances {
            self.put_row(&mut batch, CF_REMITTANCES, remittance.id(), remittance)?;
        }
        for rating in &changes.ratings {
            self.put_row(&mut batch, CF_RATINGS, rating.id(), rating)?;
        }
        self.db.write(batch)?;
        Ok(Commit::Applied)
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>> {
        self.get_row(CF_REQUESTS, id)
    }

    async fn requests(&self) -> Result<Vec<Request>> {
        self.scan(CF_REQUESTS, |_: &Request| true)
    }

    async fn task(&self, id: TaskId) -> Result<Option<Task>> {
        self.get_row(CF_TASKS, id)
    }

    async fn tasks_for_request(&self, request_id: RequestId) -> Result<Vec<Task>> {
        self.request_tasks(request_id)
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.scan(CF_TASKS, |t: &Task| t.status() == status)
    }

    async fn tasks_for_rider(&self, rider_id: UserId) -> Result<Vec<Task>> {
        self.scan(CF_TASKS, |t: &Task| t.is_bound_to(rider_id))
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get_row(CF_PAYMENTS, id)
    }

    async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        self.request_payments(request_id)
    }

    async fn earning(&self, id: EarningId) -> Result<Option<Earning>> {
        self.get_row(CF_EARNINGS, id)
    }

    async fn earning_for_task(&self, task_id: TaskId) -> Result<Option<Earning>> {
        self.task_earning(task_id)
    }

    async fn earnings_for_rider(&self, rider_id: UserId) -> Result<Vec<Earning>> {
        self.scan(CF_EARNINGS, |e: &Earning| e.rider_id() == rider_id)
    }

    async fn remittance_for(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>> {
        self.day_remittance(rider_id, date)
    }

    async fn remittances_on(&self, date: NaiveDate) -> Result<Vec<Remittance>> {
        self.scan(CF_REMITTANCES, |r: &Remittance| r.remittance_date() == date)
    }

    async fn remittances(&self) -> Result<Vec<Remittance>> {
        self.scan(CF_REMITTANCES, |_: &Remittance| true)
    }

    async fn rating_for_task(&self, task_id: TaskId) -> Result<Option<Rating>> {
        self.task_rating(task_id)
    }

    async fn ratings_for_rider(&self, rider_id: UserId) -> Result<Vec<Rating>> {
        self.scan(CF_RATINGS, |r: &Rating| r.rider_id() == rider_id)
    }
}
