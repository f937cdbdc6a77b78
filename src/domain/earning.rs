use super::actor::UserId;
use super::money::Money;
use super::payment::PaymentId;
use super::request::RequestId;
use super::task::TaskId;
use crate::error::{EntityRef, PipelineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type EarningId = u32;
pub type RemittanceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Released,
    Paid,
}

/// A request to credit a rider for one settled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accrual {
    pub rider_id: UserId,
    pub task_id: TaskId,
    pub request_id: RequestId,
    pub payment_id: PaymentId,
    pub service_fee: Money,
    pub fee_earned: Money,
    pub bonus: Money,
}

/// The rider's share of one completed, paid task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Earning {
    id: EarningId,
    version: u32,
    rider_id: UserId,
    task_id: TaskId,
    request_id: RequestId,
    payment_id: PaymentId,
    service_fee: Money,
    fee_earned: Money,
    bonus: Money,
    total_earned: Money,
    platform_share: Money,
    payout_status: PayoutStatus,
    accrued_on: NaiveDate,
    created_at: DateTime<Utc>,
}

impl Earning {
    pub fn accrue(id: EarningId, accrual: Accrual, now: DateTime<Utc>) -> Result<Self> {
        let platform_share = accrual
            .service_fee
            .checked_sub(accrual.fee_earned)
            .ok_or_else(|| {
                PipelineError::ValidationError(format!(
                    "Fee earned {} exceeds service fee {}",
                    accrual.fee_earned, accrual.service_fee
                ))
            })?;

        Ok(Self {
            id,
            version: 0,
            rider_id: accrual.rider_id,
            task_id: accrual.task_id,
            request_id: accrual.request_id,
            payment_id: accrual.payment_id,
            service_fee: accrual.service_fee,
            fee_earned: accrual.fee_earned,
            bonus: accrual.bonus,
            total_earned: accrual.fee_earned + accrual.bonus,
            platform_share,
            payout_status: PayoutStatus::Pending,
            accrued_on: now.date_naive(),
            created_at: now,
        })
    }

    pub fn id(&self) -> EarningId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::earning(self.id)
    }

    pub fn rider_id(&self) -> UserId {
        self.rider_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn payment_id(&self) -> PaymentId {
        self.payment_id
    }

    pub fn service_fee(&self) -> Money {
        self.service_fee
    }

    pub fn fee_earned(&self) -> Money {
        self.fee_earned
    }

    pub fn bonus(&self) -> Money {
        self.bonus
    }

    pub fn total_earned(&self) -> Money {
        self.total_earned
    }

    pub fn platform_share(&self) -> Money {
        self.platform_share
    }

    pub fn payout_status(&self) -> PayoutStatus {
        self.payout_status
    }

    pub fn accrued_on(&self) -> NaiveDate {
        self.accrued_on
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True when `accrual` describes exactly this earning.
    pub fn matches(&self, accrual: &Accrual) -> bool {
        self.rider_id == accrual.rider_id
            && self.task_id == accrual.task_id
            && self.request_id == accrual.request_id
            && self.service_fee == accrual.service_fee
            && self.fee_earned == accrual.fee_earned
            && self.bonus == accrual.bonus
    }

    pub fn release(&mut self) -> Result<()> {
        if self.payout_status != PayoutStatus::Pending {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.payout_status = PayoutStatus::Released;
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<()> {
        if self.payout_status != PayoutStatus::Released {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.payout_status = PayoutStatus::Paid;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemittanceStatus {
    Pending,
    Remitted,
    Waived,
}

impl RemittanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Remitted => "remitted",
            Self::Waived => "waived",
        }
    }
}

impl fmt::Display for RemittanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rider's takings for one calendar day.
///
/// Unique per `(rider_id, remittance_date)`; grows while the day's earnings
/// accrue and is closed by an administrator once the platform share is handed
/// over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remittance {
    id: RemittanceId,
    version: u32,
    rider_id: UserId,
    remittance_date: NaiveDate,
    total_tasks: u32,
    total_service_fee: Money,
    rider_share: Money,
    platform_share: Money,
    status: RemittanceStatus,
    remitted_at: Option<DateTime<Utc>>,
    received_by: Option<UserId>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Remittance {
    pub fn open(id: RemittanceId, rider_id: UserId, remittance_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            version: 0,
            rider_id,
            remittance_date,
            total_tasks: 0,
            total_service_fee: Money::ZERO,
            rider_share: Money::ZERO,
            platform_share: Money::ZERO,
            status: RemittanceStatus::Pending,
            remitted_at: None,
            received_by: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> RemittanceId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::remittance(self.id)
    }

    pub fn rider_id(&self) -> UserId {
        self.rider_id
    }

    pub fn remittance_date(&self) -> NaiveDate {
        self.remittance_date
    }

    pub fn total_tasks(&self) -> u32 {
        self.total_tasks
    }

    pub fn total_service_fee(&self) -> Money {
        self.total_service_fee
    }

    pub fn rider_share(&self) -> Money {
        self.rider_share
    }

    pub fn platform_share(&self) -> Money {
        self.platform_share
    }

    pub fn status(&self) -> RemittanceStatus {
        self.status
    }

    pub fn remitted_at(&self) -> Option<DateTime<Utc>> {
        self.remitted_at
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Adds one earning's numbers to the day's totals.
    pub fn add(&mut self, earning: &Earning, now: DateTime<Utc>) -> Result<()> {
        if self.status != RemittanceStatus::Pending
            || earning.rider_id() != self.rider_id
            || earning.accrued_on() != self.remittance_date
        {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.total_tasks += 1;
        self.total_service_fee += earning.service_fee();
        self.rider_share += earning.fee_earned();
        self.platform_share += earning.platform_share();
        self.updated_at = now;
        Ok(())
    }

    fn settle(
        &mut self,
        to: RemittanceStatus,
        by: UserId,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != RemittanceStatus::Pending || self.remittance_date >= now.date_naive() {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.status = to;
        self.remitted_at = Some(now);
        self.received_by = Some(by);
        self.notes = notes;
        self.updated_at = now;
        Ok(())
    }

    /// The platform share was handed over. The current day cannot be closed.
    pub fn close(&mut self, received_by: UserId, notes: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.settle(RemittanceStatus::Remitted, received_by, notes, now)
    }

    pub fn waive(&mut self, waived_by: UserId, notes: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.settle(RemittanceStatus::Waived, waived_by, notes, now)
    }
}
