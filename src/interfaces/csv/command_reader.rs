use super::commands::{ScriptCommand, ScriptRow};
use crate::error::{PipelineError, Result};
use std::io::Read;

/// Reads pipeline commands from a CSV script.
///
/// Wraps `csv::Reader`, trimming whitespace and tolerating short rows so
/// trailing empty columns can be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses each row into a command. A bad row yields an error and
    /// reading carries on with the next one.
    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader.into_deserialize::<ScriptRow>().map(|result| {
            result
                .map_err(PipelineError::from)
                .and_then(ScriptCommand::try_from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::actor::Actor;
    use crate::interfaces::csv::commands::Command;
    use crate::domain::task::TaskKind;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, actor, role, target, amount, fee, method, detail\n\
                    open, 10, customer, , 1000.00, 50.00, cash, Metro Water\n\
                    create_task, 10, customer, 1, , , , pay_bill\n\
                    accept, 7, rider, 1";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<ScriptCommand>> = reader.commands().collect();

        assert_eq!(results.len(), 3);
        let open = results[0].as_ref().unwrap();
        assert_eq!(open.actor, Actor::customer(10));
        assert!(matches!(&open.command, Command::Open(draft) if draft.biller_name == "Metro Water"));
        assert_eq!(
            results[1].as_ref().unwrap().command,
            Command::CreateTask(1, TaskKind::PayBill)
        );
        assert_eq!(results[2].as_ref().unwrap().command, Command::Accept(1));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, actor, role, target\nteleport, 1, rider, 1\naccept, 1, pilot, 1\naccept, 1, rider, 1";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<ScriptCommand>> = reader.commands().collect();

        assert!(matches!(results[0], Err(PipelineError::CsvError(_))));
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
