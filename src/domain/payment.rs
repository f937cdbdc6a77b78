use super::actor::UserId;
use super::money::Money;
use super::request::{PaymentMethod, Request, RequestId};
use super::task::{Task, TaskId, TaskStatus};
use crate::error::{EntityRef, PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PaymentId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement record for the money collected on a completed task.
///
/// The amounts are a snapshot of the request at recording time and are never
/// edited afterwards; a correction is a new payment after this one fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    version: u32,
    request_id: RequestId,
    task_id: TaskId,
    customer_id: UserId,
    rider_id: UserId,
    bill_amount: Money,
    service_fee: Money,
    total_collected: Money,
    method: PaymentMethod,
    external_reference: Option<String>,
    receipt_url: Option<String>,
    status: PaymentStatus,
    payment_date: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl Payment {
    /// Reconciles `collected` against the request and builds a pending payment.
    ///
    /// The check is exact: `collected` must equal bill amount plus service fee
    /// to the cent, otherwise `AmountMismatch` is returned and nothing is built.
    pub fn record(
        id: PaymentId,
        request: &Request,
        task: &Task,
        method: PaymentMethod,
        external_reference: Option<String>,
        collected: Money,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if task.status() != TaskStatus::Completed || task.request_id() != request.id() {
            return Err(PipelineError::InvalidState(task.entity()));
        }
        let rider_id = task
            .rider_id()
            .ok_or(PipelineError::InvalidState(task.entity()))?;
        if collected != request.bill_amount() + request.service_fee() {
            return Err(PipelineError::AmountMismatch(request.entity()));
        }

        Ok(Self {
            id,
            version: 0,
            request_id: request.id(),
            task_id: task.id(),
            customer_id: request.customer_id(),
            rider_id,
            bill_amount: request.bill_amount(),
            service_fee: request.service_fee(),
            total_collected: collected,
            method,
            external_reference: external_reference.filter(|r| !r.trim().is_empty()),
            receipt_url: None,
            status: PaymentStatus::Pending,
            payment_date: now,
            verified_at: None,
            completed_at: None,
            failure_reason: None,
        })
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::payment(self.id)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn customer_id(&self) -> UserId {
        self.customer_id
    }

    pub fn rider_id(&self) -> UserId {
        self.rider_id
    }

    pub fn bill_amount(&self) -> Money {
        self.bill_amount
    }

    pub fn service_fee(&self) -> Money {
        self.service_fee
    }

    pub fn total_collected(&self) -> Money {
        self.total_collected
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn external_reference(&self) -> Option<&str> {
        self.external_reference.as_deref()
    }

    pub fn receipt_url(&self) -> Option<&str> {
        self.receipt_url.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn payment_date(&self) -> DateTime<Utc> {
        self.payment_date
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Failed payments are excluded from the one-open-payment-per-request rule.
    pub fn is_open(&self) -> bool {
        self.status != PaymentStatus::Failed
    }

    pub fn verify(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Pending {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.status = PaymentStatus::Verified;
        self.verified_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Verified => {
                self.status = PaymentStatus::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
            _ => Err(PipelineError::InvalidState(self.entity())),
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Verified => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason.into());
                Ok(())
            }
            _ => Err(PipelineError::InvalidState(self.entity())),
        }
    }

    pub fn attach_receipt(&mut self, url: String) -> Result<()> {
        if self.status == PaymentStatus::Failed {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.receipt_url = Some(url);
        Ok(())
    }
}
