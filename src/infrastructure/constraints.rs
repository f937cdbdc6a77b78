//! Commit validation shared by every `LedgerStore` backend.
//!
//! Backends call [`check`] while holding their write lock, so the view they
//! pass in cannot change between the check and the write.

use crate::domain::actor::UserId;
use crate::domain::earning::{Earning, Remittance};
use crate::domain::payment::Payment;
use crate::domain::ports::{ChangeSet, Commit, Violation};
use crate::domain::rating::Rating;
use crate::domain::request::RequestId;
use crate::domain::task::{Task, TaskId};
use crate::error::{EntityRef, Result};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

/// Synchronous read access to a backend's current rows.
pub(crate) trait TableView {
    fn stored_version(&self, entity: EntityRef) -> Result<Option<u32>>;
    fn request_tasks(&self, request_id: RequestId) -> Result<Vec<Task>>;
    fn request_payments(&self, request_id: RequestId) -> Result<Vec<Payment>>;
    fn task_earning(&self, task_id: TaskId) -> Result<Option<Earning>>;
    fn task_rating(&self, task_id: TaskId) -> Result<Option<Rating>>;
    fn day_remittance(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>>;
}

pub(crate) fn check(changes: &ChangeSet, view: &impl TableView) -> Result<Commit> {
    for (entity, expected) in changes.expected_versions() {
        let stored = view.stored_version(entity)?;
        let fresh = match stored {
            None => expected == 0,
            Some(version) => version == expected && expected > 0,
        };
        if !fresh {
            return Ok(Commit::Stale(entity));
        }
    }

    let request_ids: BTreeSet<RequestId> = changes.tasks.iter().map(Task::request_id).collect();
    for request_id in request_ids {
        let mut tasks: HashMap<TaskId, Task> = view
            .request_tasks(request_id)?
            .into_iter()
            .map(|t| (t.id(), t))
            .collect();
        for task in changes.tasks.iter().filter(|t| t.request_id() == request_id) {
            tasks.insert(task.id(), task.clone());
        }
        if tasks.values().filter(|t| !t.status().is_terminal()).count() > 1 {
            return Ok(Commit::Violated(Violation::ActiveTask(request_id)));
        }
    }

    let request_ids: BTreeSet<RequestId> = changes.payments.iter().map(Payment::request_id).collect();
    for request_id in request_ids {
        let mut payments: HashMap<u32, Payment> = view
            .request_payments(request_id)?
            .into_iter()
            .map(|p| (p.id(), p))
            .collect();
        for payment in changes.payments.iter().filter(|p| p.request_id() == request_id) {
            payments.insert(payment.id(), payment.clone());
        }
        if payments.values().filter(|p| p.is_open()).count() > 1 {
            return Ok(Commit::Violated(Violation::OpenPayment(request_id)));
        }
    }

    for earning in &changes.earnings {
        if let Some(existing) = view.task_earning(earning.task_id())?
            && existing.id() != earning.id()
        {
            return Ok(Commit::Violated(Violation::EarningForTask(earning.task_id())));
        }
    }

    for rating in &changes.ratings {
        if let Some(existing) = view.task_rating(rating.task_id())?
            && existing.id() != rating.id()
        {
            return Ok(Commit::Violated(Violation::RatingForTask(rating.task_id())));
        }
    }

    for remittance in &changes.remittances {
        if let Some(existing) = view.day_remittance(remittance.rider_id(), remittance.remittance_date())?
            && existing.id() != remittance.id()
        {
            return Ok(Commit::Violated(Violation::RemittanceForDay(
                remittance.rider_id(),
                remittance.remittance_date(),
            )));
        }
    }

    Ok(Commit::Applied)
}
