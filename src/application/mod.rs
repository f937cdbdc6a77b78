//! Application layer orchestrating the dispatch and settlement pipeline.
//!
//! Each component validates a transition on domain values it has read, then
//! writes every touched row through one [`LedgerStore::commit`]. A commit that
//! comes back stale or violating a uniqueness rule has written nothing, so
//! every operation here is all-or-nothing.

pub mod dispatcher;
pub mod earnings;
pub mod pipeline;
pub mod ratings;
pub mod requests;
pub mod settlement;

use crate::domain::actor::UserId;
use crate::domain::earning::{Earning, EarningId};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{
    Clock, Commit, EventKind, LedgerStore, MediaStore, Notifier, SharedLedgerStore, Violation,
};
use crate::domain::request::{Request, RequestId};
use crate::domain::task::{Task, TaskId};
use crate::error::{EntityRef, PipelineError, Result};
use std::sync::Arc;
use tracing::warn;

/// Collaborators shared by every component. Cloning shares them.
#[derive(Clone)]
pub struct Context {
    pub store: SharedLedgerStore,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub media: Arc<dyn MediaStore>,
}

impl Context {
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// Delivers an event. Failures are logged and swallowed.
    pub(crate) async fn notify(&self, user_id: UserId, kind: EventKind, payload: serde_json::Value) {
        if let Err(err) = self.notifier.notify(user_id, kind, payload).await {
            warn!(user_id, event = %kind, error = %err, "notification not delivered");
        }
    }

    pub(crate) async fn load_request(&self, id: RequestId) -> Result<Request> {
        self.store
            .request(id)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::request(id)))
    }

    pub(crate) async fn load_task(&self, id: TaskId) -> Result<Task> {
        self.store
            .task(id)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::task(id)))
    }

    pub(crate) async fn load_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .payment(id)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::payment(id)))
    }

    pub(crate) async fn load_earning(&self, id: EarningId) -> Result<Earning> {
        self.store
            .earning(id)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::earning(id)))
    }
}

/// Maps a rejected commit to the error its caller reports.
pub(crate) fn applied(outcome: Commit) -> Result<()> {
    match outcome {
        Commit::Applied => Ok(()),
        Commit::Stale(entity) => Err(PipelineError::Conflict(entity)),
        Commit::Violated(violation) => Err(violation_error(violation)),
    }
}

pub(crate) fn violation_error(violation: Violation) -> PipelineError {
    match violation {
        Violation::ActiveTask(request_id) | Violation::OpenPayment(request_id) => {
            PipelineError::InvalidState(EntityRef::request(request_id))
        }
        Violation::EarningForTask(task_id) => PipelineError::DuplicateAccrual(EntityRef::task(task_id)),
        Violation::RatingForTask(task_id) => PipelineError::AlreadyRated(EntityRef::task(task_id)),
        Violation::RemittanceForDay(rider_id, _) => PipelineError::Conflict(EntityRef::rider(rider_id)),
    }
}
