use super::actor::UserId;
use super::money::Money;
use crate::error::{EntityRef, PipelineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RequestId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Wallet,
}

impl FromStr for PaymentMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "wallet" | "wallet_transfer" | "gcash" => Ok(Self::Wallet),
            other => Err(PipelineError::ValidationError(format!(
                "Unknown payment method '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Assigned,
    PaymentProcessing,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::PaymentProcessing => "payment_processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a customer submits to open a bill-payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDraft {
    pub biller_name: String,
    pub biller_category: String,
    pub account_reference: String,
    pub bill_amount: Decimal,
    pub service_fee: Decimal,
    pub payment_method: PaymentMethod,
    pub delivery_address: String,
    pub contact_number: String,
    pub zone: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub special_instructions: Option<String>,
}

/// A customer's bill-payment order and its top-level status.
///
/// Amounts are fixed at creation: `total` is computed once from the bill
/// amount and service fee and never recomputed. Status only changes through
/// the transition methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    id: RequestId,
    version: u32,
    customer_id: UserId,
    biller_name: String,
    biller_category: String,
    account_reference: String,
    bill_amount: Money,
    service_fee: Money,
    total: Money,
    payment_method: PaymentMethod,
    delivery_address: String,
    contact_number: String,
    zone: Option<String>,
    due_date: Option<NaiveDate>,
    special_instructions: Option<String>,
    bill_photo_url: Option<String>,
    status: RequestStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(PipelineError::ValidationError(format!("{field} is required")))
    } else {
        Ok(())
    }
}

impl Request {
    /// Validates a draft and opens it as a `pending` request.
    pub fn open(id: RequestId, customer_id: UserId, draft: RequestDraft, now: DateTime<Utc>) -> Result<Self> {
        required("biller_name", &draft.biller_name)?;
        required("account_reference", &draft.account_reference)?;
        required("delivery_address", &draft.delivery_address)?;
        required("contact_number", &draft.contact_number)?;

        let bill_amount = Money::positive(draft.bill_amount)?;
        let service_fee = Money::new(draft.service_fee)?;

        Ok(Self {
            id,
            version: 0,
            customer_id,
            biller_name: draft.biller_name,
            biller_category: draft.biller_category,
            account_reference: draft.account_reference,
            bill_amount,
            service_fee,
            total: bill_amount + service_fee,
            payment_method: draft.payment_method,
            delivery_address: draft.delivery_address,
            contact_number: draft.contact_number,
            zone: draft.zone.filter(|z| !z.trim().is_empty()),
            due_date: draft.due_date,
            special_instructions: draft.special_instructions,
            bill_photo_url: None,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::request(self.id)
    }

    pub fn customer_id(&self) -> UserId {
        self.customer_id
    }

    pub fn biller_name(&self) -> &str {
        &self.biller_name
    }

    pub fn biller_category(&self) -> &str {
        &self.biller_category
    }

    pub fn account_reference(&self) -> &str {
        &self.account_reference
    }

    pub fn bill_amount(&self) -> Money {
        self.bill_amount
    }

    pub fn service_fee(&self) -> Money {
        self.service_fee
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn delivery_address(&self) -> &str {
        &self.delivery_address
    }

    pub fn contact_number(&self) -> &str {
        &self.contact_number
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn special_instructions(&self) -> Option<&str> {
        self.special_instructions.as_deref()
    }

    pub fn bill_photo_url(&self) -> Option<&str> {
        self.bill_photo_url.as_deref()
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn transition(&mut self, from: &[RequestStatus], to: RequestStatus, now: DateTime<Utc>) -> Result<()> {
        if !from.contains(&self.status) {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// A rider accepted the current task.
    pub fn assign(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[RequestStatus::Pending], RequestStatus::Assigned, now)
    }

    /// The current task failed; the request becomes eligible for a retry task.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[RequestStatus::Assigned], RequestStatus::Pending, now)
    }

    /// The rider finished the task and money now has to be reconciled.
    pub fn await_payment(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[RequestStatus::Assigned], RequestStatus::PaymentProcessing, now)
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(&[RequestStatus::PaymentProcessing], RequestStatus::Completed, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Only a request nobody is working on can be cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            RequestStatus::Pending => self.transition(&[RequestStatus::Pending], RequestStatus::Cancelled, now),
            RequestStatus::Assigned | RequestStatus::PaymentProcessing => {
                Err(PipelineError::Conflict(self.entity()))
            }
            RequestStatus::Completed | RequestStatus::Cancelled => {
                Err(PipelineError::InvalidState(self.entity()))
            }
        }
    }

    pub fn attach_bill_photo(&mut self, url: String, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(PipelineError::InvalidState(self.entity()));
        }
        self.bill_photo_url = Some(url);
        self.updated_at = now;
        Ok(())
    }
}
