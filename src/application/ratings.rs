use super::{Context, applied};
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::ports::{ChangeSet, EventKind};
use crate::domain::rating::{Rating, RatingDraft, RiderSummary};
use crate::domain::task::{TaskId, TaskStatus};
use crate::error::{EntityKind, PipelineError, Result};
use serde_json::json;
use tracing::info;

/// Folds post-task customer ratings into rider summaries.
///
/// Nothing here feeds back into task or request state; the dispatcher only
/// reads [`RatingAggregator::rollup`] as an eligibility signal.
#[derive(Clone)]
pub struct RatingAggregator {
    ctx: Context,
}

impl RatingAggregator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Rates the rider of a completed task. One rating per task.
    pub async fn submit(&self, actor: Actor, task_id: TaskId, draft: RatingDraft) -> Result<Rating> {
        let task = self.ctx.load_task(task_id).await?;
        actor.require(Role::Customer, task.entity())?;
        let Some(rider_id) = task.rider_id().filter(|_| task.status() == TaskStatus::Completed) else {
            return Err(PipelineError::NotCompletable(task.entity()));
        };
        let request = self.ctx.load_request(task.request_id()).await?;
        if request.customer_id() != actor.id {
            return Err(PipelineError::Forbidden(task.entity()));
        }
        if self.ctx.store.rating_for_task(task_id).await?.is_some() {
            return Err(PipelineError::AlreadyRated(task.entity()));
        }

        let id = self.ctx.store.allocate_id(EntityKind::Rating).await?;
        let rating = Rating::new(
            id,
            task_id,
            request.id(),
            rider_id,
            actor.id,
            draft,
            self.ctx.clock.now(),
        )?;
        let overall = rating.overall();
        applied(self.ctx.store.commit(ChangeSet::new().rating(rating.clone())).await?)?;

        info!(rating_id = id, task_id, rider_id, %overall, "rating received");
        self.ctx
            .notify(
                rider_id,
                EventKind::RatingReceived,
                json!({ "task_id": task_id, "rating": overall }),
            )
            .await;
        Ok(rating)
    }

    /// Current average rating, task counts and availability for a rider.
    pub async fn rollup(&self, rider_id: UserId) -> Result<RiderSummary> {
        let ratings = self.ctx.store.ratings_for_rider(rider_id).await?;
        let tasks = self.ctx.store.tasks_for_rider(rider_id).await?;
        let count = |wanted: &[TaskStatus]| tasks.iter().filter(|t| wanted.contains(&t.status())).count() as u32;
        let tasks_completed = count(&[TaskStatus::Completed]);
        let active_tasks = count(&[TaskStatus::Accepted, TaskStatus::InProgress]);
        Ok(RiderSummary::from_ratings(rider_id, &ratings, tasks_completed, active_tasks))
    }

    pub async fn for_rider(&self, rider_id: UserId) -> Result<Vec<Rating>> {
        self.ctx.store.ratings_for_rider(rider_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{CUSTOMER, RIDER, completed_task, harness, open_request};
    use crate::domain::rating::RiderAvailability;
    use crate::domain::task::TaskKind;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_submit_and_rollup() {
        let h = harness();
        let (_, task) = completed_task(&h.pipeline, dec!(100), dec!(10)).await;

        let mut draft = RatingDraft::overall(dec!(4));
        draft.feedback_text = Some("quick and polite".to_string());
        let rating = h
            .pipeline
            .ratings
            .submit(Actor::customer(CUSTOMER), task.id(), draft)
            .await
            .unwrap();
        assert_eq!(rating.rider_id(), RIDER);

        let summary = h.pipeline.ratings.rollup(RIDER).await.unwrap();
        assert_eq!(summary.average_rating, Some(dec!(4)));
        assert_eq!(summary.ratings_count, 1);
        assert_eq!(summary.tasks_completed, 1);
        assert_eq!(summary.availability, RiderAvailability::Available);
        assert!(h.notifier.sent_to(RIDER).await.contains(&EventKind::RatingReceived));
    }

    #[tokio::test]
    async fn test_second_rating_rejected() {
        let h = harness();
        let (_, task) = completed_task(&h.pipeline, dec!(100), dec!(10)).await;
        let customer = Actor::customer(CUSTOMER);
        h.pipeline
            .ratings
            .submit(customer, task.id(), RatingDraft::overall(dec!(5)))
            .await
            .unwrap();
        let err = h
            .pipeline
            .ratings
            .submit(customer, task.id(), RatingDraft::overall(dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRated(_)));
        assert_eq!(h.pipeline.ratings.for_rider(RIDER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unfinished_task_cannot_be_rated() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(100), dec!(10)).await;
        let task = h
            .pipeline
            .dispatcher
            .create_task(Actor::customer(CUSTOMER), request.id(), TaskKind::CollectPayment)
            .await
            .unwrap();
        h.pipeline.dispatcher.accept(Actor::rider(RIDER), task.id()).await.unwrap();
        let summary = h.pipeline.ratings.rollup(RIDER).await.unwrap();
        assert_eq!(summary.active_tasks, 1);
        assert_eq!(summary.availability, RiderAvailability::Busy);

        let err = h
            .pipeline
            .ratings
            .submit(Actor::customer(CUSTOMER), task.id(), RatingDraft::overall(dec!(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotCompletable(_)));
    }

    #[tokio::test]
    async fn test_only_the_requesting_customer_rates() {
        let h = harness();
        let (_, task) = completed_task(&h.pipeline, dec!(100), dec!(10)).await;
        let err = h
            .pipeline
            .ratings
            .submit(Actor::customer(CUSTOMER + 1), task.id(), RatingDraft::overall(dec!(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
    }
}
