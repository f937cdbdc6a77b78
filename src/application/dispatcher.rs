use super::ratings::RatingAggregator;
use super::{Context, applied, violation_error};
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::money::Money;
use crate::domain::ports::{ChangeSet, Commit, EventKind, MediaCategory};
use crate::domain::request::{Request, RequestId, RequestStatus};
use crate::domain::task::{Task, TaskId, TaskKind, TaskStatus};
use crate::error::{EntityKind, EntityRef, PipelineError, Result};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

/// Failure reason recorded by [`TaskDispatcher::advance`] when a rider gives up.
pub const ABANDONED_REASON: &str = "abandoned by rider";
/// Failure reason recorded by [`TaskDispatcher::expire_stale`].
pub const EXPIRED_REASON: &str = "expired";

/// Keeps low-rated riders away from expensive bills.
///
/// A rider whose average rating is below `min_rating` may not accept a task
/// whose request total is at or above `high_value_threshold`. Riders without
/// any rating are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityGate {
    pub high_value_threshold: Money,
    pub min_rating: Decimal,
}

/// Optional constraints a rider browses available work with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiderFilter {
    /// Empty means any kind.
    pub kinds: Vec<TaskKind>,
    pub zone: Option<String>,
    pub max_total: Option<Money>,
}

impl RiderFilter {
    pub fn matches(&self, entry: &AvailableTask) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&entry.task.kind()))
            && self
                .zone
                .as_deref()
                .is_none_or(|zone| entry.request.zone().is_some_and(|z| z.eq_ignore_ascii_case(zone)))
            && self.max_total.is_none_or(|max| entry.request.total() <= max)
    }
}

/// A pending task together with the request it serves.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailableTask {
    pub task: Task,
    pub request: Request,
}

/// Snapshot of pending work taken by [`TaskDispatcher::list_available`].
///
/// The snapshot is read once; [`AvailableTasks::iter`] filters it lazily and
/// can be called any number of times.
#[derive(Debug, Clone)]
pub struct AvailableTasks {
    entries: Vec<AvailableTask>,
    filter: RiderFilter,
}

impl AvailableTasks {
    pub fn iter(&self) -> impl Iterator<Item = &AvailableTask> + '_ {
        self.entries.iter().filter(|entry| self.filter.matches(entry))
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.iter().map(|entry| entry.task.id()).collect()
    }
}

/// Creates tasks against requests and mediates rider acceptance.
#[derive(Clone)]
pub struct TaskDispatcher {
    ctx: Context,
    ratings: RatingAggregator,
    gate: Option<EligibilityGate>,
}

impl TaskDispatcher {
    pub fn new(ctx: Context, ratings: RatingAggregator, gate: Option<EligibilityGate>) -> Self {
        Self { ctx, ratings, gate }
    }

    /// Creates a `pending` task for a request nobody is working on.
    ///
    /// The request stays `pending` until a rider accepts. A retry after a
    /// failed task goes through here as well.
    pub async fn create_task(&self, actor: Actor, request_id: RequestId, kind: TaskKind) -> Result<Task> {
        let request = self.ctx.load_request(request_id).await?;
        actor.require_owner_or_admin(Role::Customer, request.customer_id(), request.entity())?;
        if request.status() != RequestStatus::Pending {
            return Err(PipelineError::InvalidState(request.entity()));
        }
        let tasks = self.ctx.store.tasks_for_request(request_id).await?;
        if tasks.iter().any(|t| !t.status().is_terminal()) {
            return Err(PipelineError::InvalidState(request.entity()));
        }

        let id = self.ctx.store.allocate_id(EntityKind::Task).await?;
        let task = Task::new(id, request_id, kind, self.ctx.clock.now());
        // The unchanged request rides along so a concurrent cancel or accept
        // makes this commit stale.
        applied(
            self.ctx
                .store
                .commit(ChangeSet::new().task(task).request(request))
                .await?,
        )?;

        info!(task_id = id, request_id, ?kind, attempt = tasks.len() + 1, "task created");
        self.ctx.load_task(id).await
    }

    /// Pending tasks on pending requests, matched against `filter`.
    pub async fn list_available(&self, filter: RiderFilter) -> Result<AvailableTasks> {
        let requests: HashMap<RequestId, Request> = self
            .ctx
            .store
            .requests()
            .await?
            .into_iter()
            .filter(|r| r.status() == RequestStatus::Pending)
            .map(|r| (r.id(), r))
            .collect();
        let entries = self
            .ctx
            .store
            .tasks_with_status(TaskStatus::Pending)
            .await?
            .into_iter()
            .filter_map(|task| {
                let request = requests.get(&task.request_id())?.clone();
                Some(AvailableTask { task, request })
            })
            .collect();
        Ok(AvailableTasks { entries, filter })
    }

    /// Binds the calling rider to a pending task.
    ///
    /// The task and its request are written with a version check, so among
    /// riders racing for the same task exactly one succeeds and every other
    /// one gets `AlreadyTaken`.
    pub async fn accept(&self, actor: Actor, task_id: TaskId) -> Result<Task> {
        let mut task = self.ctx.load_task(task_id).await?;
        actor.require(Role::Rider, task.entity())?;
        let mut request = self.ctx.load_request(task.request_id()).await?;

        let now = self.ctx.clock.now();
        task.accept(actor.id, now)?;
        // A pending task on an assigned request was read just before another rider won it.
        if request.status() == RequestStatus::Assigned {
            warn!(task_id, rider_id = actor.id, "task already taken");
            return Err(PipelineError::AlreadyTaken(EntityRef::task(task_id)));
        }
        self.check_eligibility(actor.id, &task, &request).await?;
        request.assign(now)?;

        let outcome = self
            .ctx
            .store
            .commit(ChangeSet::new().task(task).request(request))
            .await?;
        match outcome {
            Commit::Applied => {}
            Commit::Stale(_) => {
                warn!(task_id, rider_id = actor.id, "task already taken");
                return Err(PipelineError::AlreadyTaken(EntityRef::task(task_id)));
            }
            Commit::Violated(violation) => return Err(violation_error(violation)),
        }

        let task = self.ctx.load_task(task_id).await?;
        info!(task_id, rider_id = actor.id, request_id = task.request_id(), "task accepted");
        let request = self.ctx.load_request(task.request_id()).await?;
        self.ctx
            .notify(
                request.customer_id(),
                EventKind::TaskAssigned,
                json!({ "task_id": task_id, "request_id": request.id(), "rider_id": actor.id }),
            )
            .await;
        Ok(task)
    }

    /// Moves a task along its sub-path on behalf of the bound rider.
    ///
    /// `completed` hands the request to settlement; `failed` reopens it for a
    /// retry task.
    pub async fn advance(&self, actor: Actor, task_id: TaskId, to: TaskStatus) -> Result<Task> {
        let mut task = self.ctx.load_task(task_id).await?;
        if actor.role != Role::Rider || !task.is_bound_to(actor.id) {
            return Err(PipelineError::Forbidden(task.entity()));
        }
        let from = task.status();
        let now = self.ctx.clock.now();
        if to == TaskStatus::Failed {
            task.fail(ABANDONED_REASON, now)?;
        } else {
            task.advance(to, now)?;
        }

        let mut changes = ChangeSet::new();
        let mut request = self.ctx.load_request(task.request_id()).await?;
        match to {
            TaskStatus::Completed => {
                request.await_payment(now)?;
                changes = changes.request(request);
            }
            TaskStatus::Failed if request.status() == RequestStatus::Assigned => {
                request.reopen(now)?;
                changes = changes.request(request);
            }
            _ => {}
        }
        applied(self.ctx.store.commit(changes.task(task)).await?)?;

        info!(task_id, rider_id = actor.id, %from, %to, "task advanced");
        let task = self.ctx.load_task(task_id).await?;
        self.announce(&task).await?;
        Ok(task)
    }

    /// Reclaims an abandoned task; equivalent to a `failed` transition.
    ///
    /// Meant for a timer-driven caller, so only admins may invoke it.
    pub async fn expire_stale(&self, actor: Actor, task_id: TaskId) -> Result<Task> {
        let mut task = self.ctx.load_task(task_id).await?;
        actor.require(Role::Admin, task.entity())?;
        let now = self.ctx.clock.now();
        task.fail(EXPIRED_REASON, now)?;

        let mut changes = ChangeSet::new();
        let mut request = self.ctx.load_request(task.request_id()).await?;
        if request.status() == RequestStatus::Assigned {
            request.reopen(now)?;
            changes = changes.request(request);
        }
        applied(self.ctx.store.commit(changes.task(task)).await?)?;

        warn!(task_id, "task expired");
        let task = self.ctx.load_task(task_id).await?;
        self.announce(&task).await?;
        Ok(task)
    }

    /// Uploads proof of work for a task and records its URL.
    pub async fn attach_proof(&self, actor: Actor, task_id: TaskId, bytes: Vec<u8>) -> Result<Task> {
        let mut task = self.ctx.load_task(task_id).await?;
        if actor.role != Role::Rider || !task.is_bound_to(actor.id) {
            return Err(PipelineError::Forbidden(task.entity()));
        }
        if task.status() == TaskStatus::Failed {
            return Err(PipelineError::InvalidState(task.entity()));
        }
        let url = self.ctx.media.store(bytes, MediaCategory::TaskProof).await?;
        task.attach_proof(url)?;
        applied(self.ctx.store.commit(ChangeSet::new().task(task)).await?)?;
        self.ctx.load_task(task_id).await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Task> {
        self.ctx.load_task(task_id).await
    }

    pub async fn tasks_for_request(&self, request_id: RequestId) -> Result<Vec<Task>> {
        self.ctx.store.tasks_for_request(request_id).await
    }

    pub async fn tasks_for_rider(&self, rider_id: UserId) -> Result<Vec<Task>> {
        self.ctx.store.tasks_for_rider(rider_id).await
    }

    async fn check_eligibility(&self, rider_id: UserId, task: &Task, request: &Request) -> Result<()> {
        let Some(gate) = self.gate else {
            return Ok(());
        };
        if request.total() < gate.high_value_threshold {
            return Ok(());
        }
        let summary = self.ratings.rollup(rider_id).await?;
        if summary.meets(gate.min_rating) {
            Ok(())
        } else {
            info!(
                task_id = task.id(),
                rider_id,
                average = ?summary.average_rating,
                "rider below rating gate for high-value task"
            );
            Err(PipelineError::Forbidden(task.entity()))
        }
    }

    async fn announce(&self, task: &Task) -> Result<()> {
        let kind = match task.status() {
            TaskStatus::InProgress => EventKind::TaskStarted,
            TaskStatus::Completed => EventKind::TaskCompleted,
            TaskStatus::Failed => EventKind::TaskFailed,
            TaskStatus::Pending | TaskStatus::Accepted => return Ok(()),
        };
        let request = self.ctx.load_request(task.request_id()).await?;
        let payload = json!({
            "task_id": task.id(),
            "request_id": request.id(),
            "status": task.status().as_str(),
        });
        self.ctx.notify(request.customer_id(), kind, payload).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::Pipeline;
    use crate::application::testing::{ADMIN, CUSTOMER, RIDER, completed_task, harness, open_request};
    use crate::domain::rating::RatingDraft;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn pending_task(pipeline: &Pipeline, bill: Decimal) -> Task {
        let request = open_request(pipeline, bill, dec!(10)).await;
        pipeline
            .dispatcher
            .create_task(Actor::customer(CUSTOMER), request.id(), TaskKind::CollectPayment)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_task_keeps_request_pending() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.rider_id(), None);
        let request = h.pipeline.requests.get(task.request_id()).await.unwrap();
        assert_eq!(request.status(), RequestStatus::Pending);

        let err = h
            .pipeline
            .dispatcher
            .create_task(Actor::customer(CUSTOMER), request.id(), TaskKind::PayBill)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_accept_assigns_request_and_notifies() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        let task = h.pipeline.dispatcher.accept(Actor::rider(RIDER), task.id()).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Accepted);
        assert_eq!(task.rider_id(), Some(RIDER));

        let request = h.pipeline.requests.get(task.request_id()).await.unwrap();
        assert_eq!(request.status(), RequestStatus::Assigned);
        assert_eq!(h.notifier.sent_to(CUSTOMER).await, vec![EventKind::TaskAssigned]);

        let err = h
            .pipeline
            .dispatcher
            .accept(Actor::rider(RIDER + 1), task.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyTaken(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_available_listing_filters_lazily() {
        let h = harness();
        let cheap = pending_task(&h.pipeline, dec!(100)).await;
        let pricey = pending_task(&h.pipeline, dec!(5000)).await;

        let everything = h.pipeline.dispatcher.list_available(RiderFilter::default()).await.unwrap();
        assert_eq!(everything.task_ids(), vec![cheap.id(), pricey.id()]);
        // Restartable: a second pass yields the same entries.
        assert_eq!(everything.iter().count(), 2);

        let filter = RiderFilter {
            max_total: Some(Money::new(dec!(1000)).unwrap()),
            zone: Some("NORTH".to_string()),
            ..RiderFilter::default()
        };
        let affordable = h.pipeline.dispatcher.list_available(filter).await.unwrap();
        assert_eq!(affordable.task_ids(), vec![cheap.id()]);

        let filter = RiderFilter {
            kinds: vec![TaskKind::DeliverReceipt],
            ..RiderFilter::default()
        };
        let none = h.pipeline.dispatcher.list_available(filter).await.unwrap();
        assert_eq!(none.iter().next(), None);
    }

    #[tokio::test]
    async fn test_advance_out_of_order_and_wrong_rider() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        let rider = Actor::rider(RIDER);
        h.pipeline.dispatcher.accept(rider, task.id()).await.unwrap();

        let err = h
            .pipeline
            .dispatcher
            .advance(rider, task.id(), TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));

        let err = h
            .pipeline
            .dispatcher
            .advance(Actor::rider(RIDER + 1), task.id(), TaskStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
        let task = h.pipeline.dispatcher.task(task.id()).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Accepted);
    }

    #[tokio::test]
    async fn test_failed_task_allows_retry() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        let rider = Actor::rider(RIDER);
        h.pipeline.dispatcher.accept(rider, task.id()).await.unwrap();
        let failed = h
            .pipeline
            .dispatcher
            .advance(rider, task.id(), TaskStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.failure_reason(), Some(ABANDONED_REASON));

        let request = h.pipeline.requests.get(task.request_id()).await.unwrap();
        assert_eq!(request.status(), RequestStatus::Pending);

        let retry = h
            .pipeline
            .dispatcher
            .create_task(Actor::admin(ADMIN), request.id(), TaskKind::CollectPayment)
            .await
            .unwrap();
        assert_ne!(retry.id(), task.id());
        assert_eq!(h.pipeline.dispatcher.tasks_for_request(request.id()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expire_stale_reclaims_task() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        h.pipeline.dispatcher.accept(Actor::rider(RIDER), task.id()).await.unwrap();

        let err = h
            .pipeline
            .dispatcher
            .expire_stale(Actor::rider(RIDER), task.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));

        let expired = h
            .pipeline
            .dispatcher
            .expire_stale(Actor::admin(ADMIN), task.id())
            .await
            .unwrap();
        assert_eq!(expired.status(), TaskStatus::Failed);
        assert_eq!(expired.failure_reason(), Some(EXPIRED_REASON));
        let request = h.pipeline.requests.get(task.request_id()).await.unwrap();
        assert_eq!(request.status(), RequestStatus::Pending);

        let err = h
            .pipeline
            .dispatcher
            .expire_stale(Actor::admin(ADMIN), task.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_attach_proof_only_by_bound_rider() {
        let h = harness();
        let task = pending_task(&h.pipeline, dec!(100)).await;
        h.pipeline.dispatcher.accept(Actor::rider(RIDER), task.id()).await.unwrap();
        let err = h
            .pipeline
            .dispatcher
            .attach_proof(Actor::rider(RIDER + 1), task.id(), b"png".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
        let task = h
            .pipeline
            .dispatcher
            .attach_proof(Actor::rider(RIDER), task.id(), b"png".to_vec())
            .await
            .unwrap();
        assert_eq!(task.proof_url(), Some("memory://task_proofs/1"));
    }

    #[tokio::test]
    async fn test_rating_gate_blocks_low_rated_rider() {
        let pipeline = Pipeline::builder(Arc::new(InMemoryLedgerStore::new()))
            .eligibility_gate(EligibilityGate {
                high_value_threshold: Money::new(dec!(1000)).unwrap(),
                min_rating: dec!(4),
            })
            .build();

        // Unrated riders are eligible for anything.
        let (_, done) = completed_task(&pipeline, dec!(2000), dec!(10)).await;
        pipeline
            .ratings
            .submit(Actor::customer(CUSTOMER), done.id(), RatingDraft::overall(dec!(2)))
            .await
            .unwrap();

        let high = pending_task(&pipeline, dec!(1500)).await;
        let err = pipeline.dispatcher.accept(Actor::rider(RIDER), high.id()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));

        // Once someone else holds the task, the gated rider learns it is gone.
        pipeline.dispatcher.accept(Actor::rider(RIDER + 1), high.id()).await.unwrap();
        let err = pipeline.dispatcher.accept(Actor::rider(RIDER), high.id()).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyTaken(_)));

        let low = pending_task(&pipeline, dec!(100)).await;
        assert!(pipeline.dispatcher.accept(Actor::rider(RIDER), low.id()).await.is_ok());
    }
}
