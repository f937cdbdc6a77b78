use super::{Context, applied};
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::ports::{ChangeSet, EventKind, MediaCategory};
use crate::domain::request::{Request, RequestDraft, RequestId};
use crate::domain::task::TaskStatus;
use crate::error::{EntityKind, EntityRef, PipelineError, Result};
use serde_json::json;
use tracing::info;

/// Reason recorded on a pending task when its request is cancelled.
pub const CANCELLED_REASON: &str = "request cancelled";

/// Owns customer bill-payment requests and their top-level status.
#[derive(Clone)]
pub struct RequestLedger {
    ctx: Context,
}

impl RequestLedger {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Opens a `pending` request for the calling customer.
    pub async fn open(&self, actor: Actor, draft: RequestDraft) -> Result<Request> {
        actor.require(Role::Customer, EntityRef::customer(actor.id))?;
        let id = self.ctx.store.allocate_id(EntityKind::Request).await?;
        let request = Request::open(id, actor.id, draft, self.ctx.clock.now())?;

        applied(self.ctx.store.commit(ChangeSet::new().request(request)).await?)?;
        info!(request_id = id, customer_id = actor.id, "request opened");
        self.ctx.load_request(id).await
    }

    pub async fn get(&self, id: RequestId) -> Result<Request> {
        self.ctx.load_request(id).await
    }

    pub async fn for_customer(&self, customer_id: UserId) -> Result<Vec<Request>> {
        let mut requests = self.ctx.store.requests().await?;
        requests.retain(|r| r.customer_id() == customer_id);
        Ok(requests)
    }

    pub async fn all(&self) -> Result<Vec<Request>> {
        self.ctx.store.requests().await
    }

    /// Cancels a request nobody has accepted yet.
    ///
    /// A task still waiting for a rider is failed in the same write. Once a
    /// rider has accepted, the flow has to run to completion or failure and
    /// this returns `Conflict`.
    pub async fn cancel(&self, actor: Actor, id: RequestId) -> Result<Request> {
        let mut request = self.ctx.load_request(id).await?;
        actor.require_owner_or_admin(Role::Customer, request.customer_id(), request.entity())?;

        let now = self.ctx.clock.now();
        request.cancel(now)?;

        let mut changes = ChangeSet::new();
        for mut task in self.ctx.store.tasks_for_request(id).await? {
            if task.status() == TaskStatus::Pending {
                task.fail(CANCELLED_REASON, now)?;
                changes = changes.task(task);
            }
        }
        applied(self.ctx.store.commit(changes.request(request)).await?)?;

        info!(request_id = id, by = actor.id, "request cancelled");
        let request = self.ctx.load_request(id).await?;
        self.ctx
            .notify(
                request.customer_id(),
                EventKind::RequestCancelled,
                json!({ "request_id": id }),
            )
            .await;
        Ok(request)
    }

    /// Uploads a photo of the bill and records its URL on the request.
    pub async fn attach_bill_photo(&self, actor: Actor, id: RequestId, bytes: Vec<u8>) -> Result<Request> {
        let mut request = self.ctx.load_request(id).await?;
        actor.require_owner_or_admin(Role::Customer, request.customer_id(), request.entity())?;
        if request.status().is_terminal() {
            return Err(PipelineError::InvalidState(request.entity()));
        }

        let url = self.ctx.media.store(bytes, MediaCategory::BillPhoto).await?;
        request.attach_bill_photo(url, self.ctx.clock.now())?;
        applied(self.ctx.store.commit(ChangeSet::new().request(request)).await?)?;
        self.ctx.load_request(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{CUSTOMER, RIDER, harness, open_request};
    use crate::domain::money::Money;
    use crate::domain::request::RequestStatus;
    use crate::domain::request::tests::draft;
    use crate::domain::task::TaskKind;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_open_computes_total_once() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(1000.00), dec!(50.00)).await;
        assert_eq!(request.id(), 1);
        assert_eq!(request.total(), Money::new(dec!(1050.00)).unwrap());
        assert_eq!(request.version(), 1);
        assert_eq!(h.pipeline.requests.for_customer(CUSTOMER).await.unwrap().len(), 1);
        assert!(h.pipeline.requests.for_customer(CUSTOMER + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_customers_open_requests() {
        let h = harness();
        let err = h
            .pipeline
            .requests
            .open(Actor::rider(RIDER), draft(dec!(10), dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
        assert!(h.pipeline.requests.all().await.unwrap().is_empty());

        // A rejected open does not consume a request id.
        let request = open_request(&h.pipeline, dec!(10), dec!(1)).await;
        assert_eq!(request.id(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fails_waiting_task() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(100), dec!(5)).await;
        let task = h
            .pipeline
            .dispatcher
            .create_task(Actor::customer(CUSTOMER), request.id(), TaskKind::PayBill)
            .await
            .unwrap();

        let cancelled = h
            .pipeline
            .requests
            .cancel(Actor::customer(CUSTOMER), request.id())
            .await
            .unwrap();
        assert_eq!(cancelled.status(), RequestStatus::Cancelled);

        let task = h.pipeline.dispatcher.task(task.id()).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.failure_reason(), Some(CANCELLED_REASON));
        assert_eq!(
            h.notifier.sent_to(CUSTOMER).await,
            vec![EventKind::RequestCancelled]
        );
    }

    #[tokio::test]
    async fn test_cancel_after_acceptance_conflicts() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(100), dec!(5)).await;
        let task = h
            .pipeline
            .dispatcher
            .create_task(Actor::customer(CUSTOMER), request.id(), TaskKind::CollectPayment)
            .await
            .unwrap();
        h.pipeline.dispatcher.accept(Actor::rider(RIDER), task.id()).await.unwrap();

        let err = h
            .pipeline
            .requests
            .cancel(Actor::customer(CUSTOMER), request.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
        let task = h.pipeline.dispatcher.task(task.id()).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Accepted);
    }

    #[tokio::test]
    async fn test_cancel_requires_owner() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(100), dec!(5)).await;
        let err = h
            .pipeline
            .requests
            .cancel(Actor::customer(CUSTOMER + 1), request.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_attach_bill_photo() {
        let h = harness();
        let request = open_request(&h.pipeline, dec!(100), dec!(5)).await;
        let request = h
            .pipeline
            .requests
            .attach_bill_photo(Actor::customer(CUSTOMER), request.id(), b"jpeg".to_vec())
            .await
            .unwrap();
        assert_eq!(request.bill_photo_url(), Some("memory://bill_photos/1"));
    }
}
