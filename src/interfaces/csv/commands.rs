use crate::application::pipeline::Pipeline;
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::earning::EarningId;
use crate::domain::payment::PaymentId;
use crate::domain::rating::RatingDraft;
use crate::domain::request::{PaymentMethod, RequestDraft, RequestId};
use crate::domain::task::{TaskId, TaskKind, TaskStatus};
use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Open,
    Cancel,
    CreateTask,
    Accept,
    Advance,
    Expire,
    RecordPayment,
    VerifyPayment,
    CompletePayment,
    FailPayment,
    Rate,
    CloseRemittance,
    WaiveRemittance,
    MarkPaid,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One line of a command script: `op,actor,role,target,amount,fee,method,detail`.
///
/// Which optional columns an op reads:
///
/// | op | target | amount | fee | method | detail |
/// |----|--------|--------|-----|--------|--------|
/// | `open` | | bill | service fee | payment method | biller name |
/// | `cancel` | request | | | | |
/// | `create_task` | request | | | | task kind |
/// | `accept`, `expire` | task | | | | |
/// | `advance` | task | | | | target status |
/// | `record_payment` | request | collected | | payment method | reference |
/// | `verify_payment`, `complete_payment` | payment | | | | |
/// | `fail_payment` | payment | | | | reason |
/// | `rate` | task | overall | | | feedback |
/// | `close_remittance`, `waive_remittance` | rider | | | | date |
/// | `mark_paid` | earning | | | | |
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScriptRow {
    pub op: Op,
    pub actor: UserId,
    pub role: Role,
    pub target: Option<u32>,
    pub amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub method: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Open(RequestDraft),
    Cancel(RequestId),
    CreateTask(RequestId, TaskKind),
    Accept(TaskId),
    Advance(TaskId, TaskStatus),
    Expire(TaskId),
    RecordPayment {
        request_id: RequestId,
        method: PaymentMethod,
        reference: Option<String>,
        collected: Decimal,
    },
    VerifyPayment(PaymentId),
    CompletePayment(PaymentId),
    FailPayment(PaymentId, String),
    Rate(TaskId, RatingDraft),
    CloseRemittance(UserId, NaiveDate),
    WaiveRemittance(UserId, NaiveDate),
    MarkPaid(EarningId),
}

/// A parsed script line: who does what.
#[derive(Debug, PartialEq, Clone)]
pub struct ScriptCommand {
    pub actor: Actor,
    pub command: Command,
}

fn missing(op: Op, column: &str) -> PipelineError {
    PipelineError::ValidationError(format!("{op} requires a '{column}' value"))
}

fn detail_or<'a>(row: &'a ScriptRow, default: &'a str) -> &'a str {
    row.detail.as_deref().filter(|d| !d.is_empty()).unwrap_or(default)
}

impl TryFrom<ScriptRow> for ScriptCommand {
    type Error = PipelineError;

    fn try_from(row: ScriptRow) -> Result<Self> {
        let op = row.op;
        let target = || row.target.ok_or_else(|| missing(op, "target"));
        let amount = || row.amount.ok_or_else(|| missing(op, "amount"));
        let method = || -> Result<PaymentMethod> {
            row.method
                .as_deref()
                .filter(|m| !m.is_empty())
                .map_or(Ok(PaymentMethod::Cash), str::parse)
        };
        let date = || -> Result<NaiveDate> {
            let raw = row.detail.as_deref().ok_or_else(|| missing(op, "detail"))?;
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|err| PipelineError::ValidationError(format!("invalid date '{raw}': {err}")))
        };

        let command = match op {
            Op::Open => Command::Open(RequestDraft {
                biller_name: detail_or(&row, "Unnamed biller").to_string(),
                biller_category: "utilities".to_string(),
                account_reference: format!("CUST-{}", row.actor),
                bill_amount: amount()?,
                service_fee: row.fee.unwrap_or_default(),
                payment_method: method()?,
                delivery_address: "on file".to_string(),
                contact_number: "on file".to_string(),
                zone: None,
                due_date: None,
                special_instructions: None,
            }),
            Op::Cancel => Command::Cancel(target()?),
            Op::CreateTask => Command::CreateTask(target()?, detail_or(&row, "collect_payment").parse()?),
            Op::Accept => Command::Accept(target()?),
            Op::Advance => {
                let status = row.detail.as_deref().ok_or_else(|| missing(op, "detail"))?;
                Command::Advance(target()?, status.parse()?)
            }
            Op::Expire => Command::Expire(target()?),
            Op::RecordPayment => Command::RecordPayment {
                request_id: target()?,
                method: method()?,
                reference: row.detail.clone().filter(|d| !d.is_empty()),
                collected: amount()?,
            },
            Op::VerifyPayment => Command::VerifyPayment(target()?),
            Op::CompletePayment => Command::CompletePayment(target()?),
            Op::FailPayment => Command::FailPayment(target()?, detail_or(&row, "failed").to_string()),
            Op::Rate => {
                let mut draft = RatingDraft::overall(amount()?);
                draft.feedback_text = row.detail.clone();
                Command::Rate(target()?, draft)
            }
            Op::CloseRemittance => Command::CloseRemittance(target()?, date()?),
            Op::WaiveRemittance => Command::WaiveRemittance(target()?, date()?),
            Op::MarkPaid => Command::MarkPaid(target()?),
        };

        Ok(Self {
            actor: Actor {
                id: row.actor,
                role: row.role,
            },
            command,
        })
    }
}

impl ScriptCommand {
    /// Runs the command against `pipeline`, discarding the returned entity.
    pub async fn apply(self, pipeline: &Pipeline) -> Result<()> {
        let actor = self.actor;
        match self.command {
            Command::Open(draft) => {
                pipeline.requests.open(actor, draft).await?;
            }
            Command::Cancel(request_id) => {
                pipeline.requests.cancel(actor, request_id).await?;
            }
            Command::CreateTask(request_id, kind) => {
                pipeline.dispatcher.create_task(actor, request_id, kind).await?;
            }
            Command::Accept(task_id) => {
                pipeline.dispatcher.accept(actor, task_id).await?;
            }
            Command::Advance(task_id, to) => {
                pipeline.dispatcher.advance(actor, task_id, to).await?;
            }
            Command::Expire(task_id) => {
                pipeline.dispatcher.expire_stale(actor, task_id).await?;
            }
            Command::RecordPayment {
                request_id,
                method,
                reference,
                collected,
            } => {
                pipeline
                    .settlement
                    .record_payment(actor, request_id, method, reference, collected)
                    .await?;
            }
            Command::VerifyPayment(payment_id) => {
                pipeline.settlement.verify(actor, payment_id).await?;
            }
            Command::CompletePayment(payment_id) => {
                pipeline.settlement.complete(actor, payment_id).await?;
            }
            Command::FailPayment(payment_id, reason) => {
                pipeline.settlement.fail(actor, payment_id, reason).await?;
            }
            Command::Rate(task_id, draft) => {
                pipeline.ratings.submit(actor, task_id, draft).await?;
            }
            Command::CloseRemittance(rider_id, date) => {
                pipeline.earnings.close_remittance(actor, rider_id, date, None).await?;
            }
            Command::WaiveRemittance(rider_id, date) => {
                pipeline.earnings.waive_remittance(actor, rider_id, date, None).await?;
            }
            Command::MarkPaid(earning_id) => {
                pipeline.earnings.mark_paid(actor, earning_id).await?;
            }
        }
        Ok(())
    }
}
