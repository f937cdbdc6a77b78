use super::actor::UserId;
use super::earning::{Earning, EarningId, Remittance};
use super::payment::{Payment, PaymentId};
use super::rating::Rating;
use super::request::{Request, RequestId};
use super::task::{Task, TaskId, TaskStatus};
use crate::error::{EntityKind, EntityRef, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Rows written together by one pipeline operation.
///
/// Each row carries the version it was read at (0 for new rows). A store
/// applies the whole set or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub requests: Vec<Request>,
    pub tasks: Vec<Task>,
    pub payments: Vec<Payment>,
    pub earnings: Vec<Earning>,
    pub remittances: Vec<Remittance>,
    pub ratings: Vec<Rating>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, request: Request) -> Self {
        self.requests.push(request);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn payment(mut self, payment: Payment) -> Self {
        self.payments.push(payment);
        self
    }

    pub fn earning(mut self, earning: Earning) -> Self {
        self.earnings.push(earning);
        self
    }

    pub fn remittance(mut self, remittance: Remittance) -> Self {
        self.remittances.push(remittance);
        self
    }

    pub fn rating(mut self, rating: Rating) -> Self {
        self.ratings.push(rating);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
            && self.tasks.is_empty()
            && self.payments.is_empty()
            && self.earnings.is_empty()
            && self.remittances.is_empty()
            && self.ratings.is_empty()
    }

    /// Every written row with the version it expects to find in the store.
    pub fn expected_versions(&self) -> Vec<(EntityRef, u32)> {
        let requests = self.requests.iter().map(|r| (r.entity(), r.version()));
        let tasks = self.tasks.iter().map(|t| (t.entity(), t.version()));
        let payments = self.payments.iter().map(|p| (p.entity(), p.version()));
        let earnings = self.earnings.iter().map(|e| (e.entity(), e.version()));
        let remittances = self.remittances.iter().map(|r| (r.entity(), r.version()));
        let ratings = self.ratings.iter().map(|r| (r.entity(), r.version()));
        requests
            .chain(tasks)
            .chain(payments)
            .chain(earnings)
            .chain(remittances)
            .chain(ratings)
            .collect()
    }

    /// Advances every row to the version it will be stored at.
    pub(crate) fn bump_versions(&mut self) {
        self.requests.iter_mut().for_each(Request::bump_version);
        self.tasks.iter_mut().for_each(Task::bump_version);
        self.payments.iter_mut().for_each(Payment::bump_version);
        self.earnings.iter_mut().for_each(Earning::bump_version);
        self.remittances.iter_mut().for_each(Remittance::bump_version);
        self.ratings.iter_mut().for_each(Rating::bump_version);
    }
}

/// A uniqueness rule a commit would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A request may have at most one task in a non-terminal status.
    ActiveTask(RequestId),
    /// A request may have at most one payment that has not failed.
    OpenPayment(RequestId),
    EarningForTask(TaskId),
    RatingForTask(TaskId),
    RemittanceForDay(UserId, NaiveDate),
}

/// Outcome of [`LedgerStore::commit`]. Anything but `Applied` wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// The row changed since it was read (or a new row already exists).
    Stale(EntityRef),
    Violated(Violation),
}

/// Persistence port for the five pipeline tables plus ratings.
///
/// Reads return snapshots. All writes go through [`LedgerStore::commit`],
/// which is the compare-and-set primitive of the pipeline: a row is only
/// written if its stored version still equals the version it was read at.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Next auto-increment identifier for `kind`. Ids of rejected commits are not reused.
    async fn allocate_id(&self, kind: EntityKind) -> Result<u32>;
    async fn commit(&self, changes: ChangeSet) -> Result<Commit>;

    async fn request(&self, id: RequestId) -> Result<Option<Request>>;
    async fn requests(&self) -> Result<Vec<Request>>;

    async fn task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn tasks_for_request(&self, request_id: RequestId) -> Result<Vec<Task>>;
    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>>;
    async fn tasks_for_rider(&self, rider_id: UserId) -> Result<Vec<Task>>;

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>>;

    async fn earning(&self, id: EarningId) -> Result<Option<Earning>>;
    async fn earning_for_task(&self, task_id: TaskId) -> Result<Option<Earning>>;
    async fn earnings_for_rider(&self, rider_id: UserId) -> Result<Vec<Earning>>;

    async fn remittance_for(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>>;
    async fn remittances_on(&self, date: NaiveDate) -> Result<Vec<Remittance>>;
    async fn remittances(&self) -> Result<Vec<Remittance>>;

    async fn rating_for_task(&self, task_id: TaskId) -> Result<Option<Rating>>;
    async fn ratings_for_rider(&self, rider_id: UserId) -> Result<Vec<Rating>>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    PaymentRecorded,
    PaymentCompleted,
    PaymentFailed,
    RequestCancelled,
    RatingReceived,
    RemittanceClosed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::PaymentRecorded => "payment_recorded",
            Self::PaymentCompleted => "payment_completed",
            Self::PaymentFailed => "payment_failed",
            Self::RequestCancelled => "request_cancelled",
            Self::RatingReceived => "rating_received",
            Self::RemittanceClosed => "remittance_closed",
        };
        f.write_str(s)
    }
}

/// Fire-and-forget delivery of status events to users.
///
/// A failed delivery never undoes the transition that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    BillPhoto,
    TaskProof,
    PaymentReceipt,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillPhoto => "bill_photos",
            Self::TaskProof => "task_proofs",
            Self::PaymentReceipt => "payment_receipts",
        }
    }
}

/// Stores opaque bytes and hands back a URL; the pipeline never reads them back.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, category: MediaCategory) -> Result<String>;
}
