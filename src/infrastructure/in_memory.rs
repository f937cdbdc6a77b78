use super::constraints::{self, TableView};
use crate::domain::actor::UserId;
use crate::domain::earning::{Earning, EarningId, Remittance, RemittanceId};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{ChangeSet, Commit, LedgerStore};
use crate::domain::rating::{Rating, RatingId};
use crate::domain::request::{Request, RequestId};
use crate::domain::task::{Task, TaskId, TaskStatus};
use crate::error::{EntityKind, EntityRef, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    sequences: HashMap<EntityKind, u32>,
    requests: BTreeMap<RequestId, Request>,
    tasks: BTreeMap<TaskId, Task>,
    payments: BTreeMap<PaymentId, Payment>,
    earnings: BTreeMap<EarningId, Earning>,
    remittances: BTreeMap<RemittanceId, Remittance>,
    ratings: BTreeMap<RatingId, Rating>,
}

impl TableView for Tables {
    fn stored_version(&self, entity: EntityRef) -> Result<Option<u32>> {
        let version = match entity.kind {
            EntityKind::Request => self.requests.get(&entity.id).map(Request::version),
            EntityKind::Task => self.tasks.get(&entity.id).map(Task::version),
            EntityKind::Payment => self.payments.get(&entity.id).map(Payment::version),
            EntityKind::Earning => self.earnings.get(&entity.id).map(Earning::version),
            EntityKind::Remittance => self.remittances.get(&entity.id).map(Remittance::version),
            EntityKind::Rating => self.ratings.get(&entity.id).map(Rating::version),
            EntityKind::Rider | EntityKind::Customer => None,
        };
        Ok(version)
    }

    fn request_tasks(&self, request_id: RequestId) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .values()
            .filter(|t| t.request_id() == request_id)
            .cloned()
            .collect())
    }

    fn request_payments(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        Ok(self
            .payments
            .values()
            .filter(|p| p.request_id() == request_id)
            .cloned()
            .collect())
    }

    fn task_earning(&self, task_id: TaskId) -> Result<Option<Earning>> {
        Ok(self.earnings.values().find(|e| e.task_id() == task_id).cloned())
    }

    fn task_rating(&self, task_id: TaskId) -> Result<Option<Rating>> {
        Ok(self.ratings.values().find(|r| r.task_id() == task_id).cloned())
    }

    fn day_remittance(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>> {
        Ok(self
            .remittances
            .values()
            .find(|r| r.rider_id() == rider_id && r.remittance_date() == date)
            .cloned())
    }
}

/// A thread-safe in-memory ledger.
///
/// All tables live behind one `Arc<RwLock<..>>`: readers share the lock and a
/// commit holds it exclusively while it validates and writes, which makes
/// every commit atomic. `Clone` shares the same tables.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn allocate_id(&self, kind: EntityKind) -> Result<u32> {
        let mut tables = self.tables.write().await;
        let next = tables.sequences.entry(kind).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn commit(&self, mut changes: ChangeSet) -> Result<Commit> {
        let mut tables = self.tables.write().await;
        let outcome = constraints::check(&changes, &*tables)?;
        if outcome != Commit::Applied {
            return Ok(outcome);
        }

        changes.bump_versions();
        for request in changes.requests {
            tables.requests.insert(request.id(), request);
        }
        for task in changes.tasks {
            tables.tasks.insert(task.id(), task);
        }
        for payment in changes.payments {
            tables.payments.insert(payment.id(), payment);
        }
        for earning in changes.earnings {
            tables.earnings.insert(earning.id(), earning);
        }
        for remittance in changes.remittances {
            tables.remittances.insert(remittance.id(), remittance);
        }
        for rating in changes.ratings {
            tables.ratings.insert(rating.id(), rating);
        }
        Ok(Commit::Applied)
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.get(&id).cloned())
    }

    async fn requests(&self) -> Result<Vec<Request>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.values().cloned().collect())
    }

    async fn task(&self, id: TaskId) -> Result<Option<Task>> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.get(&id).cloned())
    }

    async fn tasks_for_request(&self, request_id: RequestId) -> Result<Vec<Task>> {
        let tables = self.tables.read().await;
        tables.request_tasks(request_id)
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect())
    }

    async fn tasks_for_rider(&self, rider_id: UserId) -> Result<Vec<Task>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.is_bound_to(rider_id))
            .cloned()
            .collect())
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        tables.request_payments(request_id)
    }

    async fn earning(&self, id: EarningId) -> Result<Option<Earning>> {
        let tables = self.tables.read().await;
        Ok(tables.earnings.get(&id).cloned())
    }

    async fn earning_for_task(&self, task_id: TaskId) -> Result<Option<Earning>> {
        let tables = self.tables.read().await;
        tables.task_earning(task_id)
    }

    async fn earnings_for_rider(&self, rider_id: UserId) -> Result<Vec<Earning>> {
        let tables = self.tables.read().await;
        Ok(tables
            .earnings
            .values()
            .filter(|e| e.rider_id() == rider_id)
            .cloned()
            .collect())
    }

    async fn remittance_for(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>> {
        let tables = self.tables.read().await;
        tables.day_remittance(rider_id, date)
    }

    async fn remittances_on(&self, date: NaiveDate) -> Result<Vec<Remittance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .remittances
            .values()
            .filter(|r| r.remittance_date() == date)
            .cloned()
            .collect())
    }

    async fn remittances(&self) -> Result<Vec<Remittance>> {
        let tables = self.tables.read().await;
        Ok(tables.remittances.values().cloned().collect())
    }

    async fn rating_for_task(&self, task_id: TaskId) -> Result<Option<Rating>> {
        let tables = self.tables.read().await;
        tables.task_rating(task_id)
    }

    async fn ratings_for_rider(&self, rider_id: UserId) -> Result<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .values()
            .filter(|r| r.rider_id() == rider_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Violation;
    use crate::domain::request::tests::draft;
    use crate::domain::task::TaskKind;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn stored_request(store: &InMemoryLedgerStore) -> Request {
        let id = store.allocate_id(EntityKind::Request).await.unwrap();
        let request = Request::open(id, 10, draft(dec!(100), dec!(5)), Utc::now()).unwrap();
        let outcome = store.commit(ChangeSet::new().request(request)).await.unwrap();
        assert_eq!(outcome, Commit::Applied);
        store.request(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_ids_auto_increment_per_kind() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.allocate_id(EntityKind::Task).await.unwrap(), 1);
        assert_eq!(store.allocate_id(EntityKind::Task).await.unwrap(), 2);
        assert_eq!(store.allocate_id(EntityKind::Payment).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_bumps_versions() {
        let store = InMemoryLedgerStore::new();
        let request = stored_request(&store).await;
        assert_eq!(request.version(), 1);
        assert!(store.request(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected_atomically() {
        let store = InMemoryLedgerStore::new();
        let request = stored_request(&store).await;
        let now = Utc::now();

        let mut first = request.clone();
        first.assign(now).unwrap();
        assert_eq!(
            store.commit(ChangeSet::new().request(first)).await.unwrap(),
            Commit::Applied
        );

        // Second writer read the same version; its task must not land either.
        let mut second = request.clone();
        second.cancel(now).unwrap();
        let task = Task::new(1, request.id(), TaskKind::CollectPayment, now);
        let outcome = store
            .commit(ChangeSet::new().request(second).task(task))
            .await
            .unwrap();
        assert_eq!(outcome, Commit::Stale(EntityRef::request(request.id())));
        assert!(store.task(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_active_task_per_request() {
        let store = InMemoryLedgerStore::new();
        let request = stored_request(&store).await;
        let now = Utc::now();

        let first = Task::new(1, request.id(), TaskKind::CollectPayment, now);
        assert_eq!(
            store.commit(ChangeSet::new().task(first)).await.unwrap(),
            Commit::Applied
        );
        let second = Task::new(2, request.id(), TaskKind::CollectPayment, now);
        assert_eq!(
            store.commit(ChangeSet::new().task(second)).await.unwrap(),
            Commit::Violated(Violation::ActiveTask(request.id()))
        );
        assert_eq!(store.tasks_for_request(request.id()).await.unwrap().len(), 1);
    }
}
