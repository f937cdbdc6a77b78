use super::{Context, applied, violation_error};
use crate::domain::actor::{Actor, Role, UserId};
use crate::domain::earning::{Accrual, Earning, EarningId, PayoutStatus, Remittance};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{ChangeSet, Commit, EventKind, Violation};
use crate::domain::task::TaskId;
use crate::error::{EntityKind, EntityRef, PipelineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

/// How many times an accrual is restaged after losing a race on the day's
/// remittance row before giving up with `Conflict`.
pub(crate) const ACCRUAL_ATTEMPTS: usize = 5;

/// Rows an accrual would write, or the earning already on record.
#[derive(Debug)]
pub(crate) enum Staged {
    Existing(Earning),
    New { earning: Earning, remittance: Remittance },
}

/// Accrues rider earnings and rolls them into daily remittances.
#[derive(Clone)]
pub struct EarningsLedger {
    ctx: Context,
}

impl EarningsLedger {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Credits a rider for one task. Idempotent per task.
    ///
    /// The accrual must name a completed payment and agree with it on task,
    /// request, rider and service fee; anything else is `InvalidState`.
    /// Repeating an identical accrual returns the earning on record and leaves
    /// the remittance totals alone. A different amount for a task that already
    /// has an earning fails with `DuplicateAccrual`.
    pub async fn accrue(&self, actor: Actor, accrual: Accrual) -> Result<Earning> {
        actor.require(Role::Admin, EntityRef::payment(accrual.payment_id))?;
        let payment = self.ctx.load_payment(accrual.payment_id).await?;
        if payment.status() != PaymentStatus::Completed {
            warn!(payment_id = payment.id(), status = %payment.status(), "accrual ahead of payment completion");
            return Err(PipelineError::InvalidState(payment.entity()));
        }
        if !settles(&payment, &accrual) {
            warn!(payment_id = payment.id(), task_id = accrual.task_id, "accrual does not match its payment");
            return Err(PipelineError::InvalidState(payment.entity()));
        }

        for attempt in 1..=ACCRUAL_ATTEMPTS {
            let now = self.ctx.clock.now();
            let (earning, remittance) = match self.stage(&accrual, now).await? {
                Staged::Existing(earning) => return Ok(earning),
                Staged::New { earning, remittance } => (earning, remittance),
            };
            let earning_id = earning.id();
            let outcome = self
                .ctx
                .store
                .commit(ChangeSet::new().earning(earning).remittance(remittance))
                .await?;
            match outcome {
                Commit::Applied => {
                    info!(earning_id, task_id = accrual.task_id, rider_id = accrual.rider_id, "earning accrued");
                    return self.ctx.load_earning(earning_id).await;
                }
                Commit::Stale(_)
                | Commit::Violated(Violation::EarningForTask(_))
                | Commit::Violated(Violation::RemittanceForDay(..)) => {
                    debug!(attempt, task_id = accrual.task_id, "accrual raced, restaging");
                }
                Commit::Violated(violation) => return Err(violation_error(violation)),
            }
        }
        Err(PipelineError::Conflict(EntityRef::rider(accrual.rider_id)))
    }

    /// Builds the earning and the updated day's remittance for `accrual`.
    pub(crate) async fn stage(&self, accrual: &Accrual, now: DateTime<Utc>) -> Result<Staged> {
        if let Some(existing) = self.ctx.store.earning_for_task(accrual.task_id).await? {
            if existing.matches(accrual) {
                return Ok(Staged::Existing(existing));
            }
            return Err(duplicate_accrual(accrual.task_id));
        }

        let id = self.ctx.store.allocate_id(EntityKind::Earning).await?;
        let earning = Earning::accrue(id, *accrual, now)?;
        let date = earning.accrued_on();
        let mut remittance = match self.ctx.store.remittance_for(accrual.rider_id, date).await? {
            Some(remittance) => remittance,
            None => {
                let id = self.ctx.store.allocate_id(EntityKind::Remittance).await?;
                Remittance::open(id, accrual.rider_id, date, now)
            }
        };
        remittance.add(&earning, now)?;
        Ok(Staged::New { earning, remittance })
    }

    /// Marks a past day's platform share as handed over by the rider.
    pub async fn close_remittance(
        &self,
        actor: Actor,
        rider_id: UserId,
        date: NaiveDate,
        notes: Option<String>,
    ) -> Result<Remittance> {
        self.settle_remittance(actor, rider_id, date, |remittance, now| {
            remittance.close(actor.id, notes, now)
        })
        .await
    }

    /// Forgives a past day's platform share.
    pub async fn waive_remittance(
        &self,
        actor: Actor,
        rider_id: UserId,
        date: NaiveDate,
        notes: Option<String>,
    ) -> Result<Remittance> {
        self.settle_remittance(actor, rider_id, date, |remittance, now| {
            remittance.waive(actor.id, notes, now)
        })
        .await
    }

    async fn settle_remittance(
        &self,
        actor: Actor,
        rider_id: UserId,
        date: NaiveDate,
        settle: impl FnOnce(&mut Remittance, DateTime<Utc>) -> Result<()>,
    ) -> Result<Remittance> {
        let mut remittance = self
            .ctx
            .store
            .remittance_for(rider_id, date)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::rider(rider_id)))?;
        actor.require(Role::Admin, remittance.entity())?;
        let now = self.ctx.clock.now();
        settle(&mut remittance, now)?;

        // Settling the day frees that day's earnings for payout.
        let mut changes = ChangeSet::new();
        for mut earning in self.ctx.store.earnings_for_rider(rider_id).await? {
            if earning.accrued_on() == date && earning.payout_status() == PayoutStatus::Pending {
                earning.release()?;
                changes = changes.earning(earning);
            }
        }
        let id = remittance.id();
        let status = remittance.status();
        applied(self.ctx.store.commit(changes.remittance(remittance)).await?)?;

        info!(remittance_id = id, rider_id, %date, %status, by = actor.id, "remittance settled");
        self.ctx
            .notify(
                rider_id,
                EventKind::RemittanceClosed,
                json!({ "date": date, "status": status.as_str() }),
            )
            .await;
        self.remittance(rider_id, date)
            .await?
            .ok_or(PipelineError::NotFound(EntityRef::remittance(id)))
    }

    /// Records that a released earning was paid out to the rider.
    pub async fn mark_paid(&self, actor: Actor, earning_id: EarningId) -> Result<Earning> {
        let mut earning = self.ctx.load_earning(earning_id).await?;
        actor.require(Role::Admin, earning.entity())?;
        earning.mark_paid()?;
        applied(self.ctx.store.commit(ChangeSet::new().earning(earning)).await?)?;
        info!(earning_id, "earning paid out");
        self.ctx.load_earning(earning_id).await
    }

    pub async fn remittance(&self, rider_id: UserId, date: NaiveDate) -> Result<Option<Remittance>> {
        self.ctx.store.remittance_for(rider_id, date).await
    }

    pub async fn remittances_on(&self, date: NaiveDate) -> Result<Vec<Remittance>> {
        self.ctx.store.remittances_on(date).await
    }

    pub async fn remittances(&self) -> Result<Vec<Remittance>> {
        self.ctx.store.remittances().await
    }

    pub async fn earnings_for_rider(&self, rider_id: UserId) -> Result<Vec<Earning>> {
        self.ctx.store.earnings_for_rider(rider_id).await
    }
}

fn settles(payment: &Payment, accrual: &Accrual) -> bool {
    payment.task_id() == accrual.task_id
        && payment.request_id() == accrual.request_id
        && payment.rider_id() == accrual.rider_id
        && payment.service_fee() == accrual.service_fee
}

pub(crate) fn duplicate_accrual(task_id: TaskId) -> PipelineError {
    error!(task_id, "conflicting accrual for an already credited task");
    PipelineError::DuplicateAccrual(EntityRef::task(task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::Pipeline;
    use crate::application::testing::{ADMIN, RIDER, completed_task, harness};
    use crate::domain::earning::RemittanceStatus;
    use crate::domain::money::Money;
    use crate::domain::ports::Clock;
    use crate::domain::request::PaymentMethod;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn money(value: Decimal) -> Money {
        Money::new(value).unwrap()
    }

    /// Runs a request through to a completed payment and returns its earning.
    async fn settle(pipeline: &Pipeline, bill: Decimal, fee: Decimal) -> Earning {
        let (request, _) = completed_task(pipeline, bill, fee).await;
        let payment = pipeline
            .settlement
            .record_payment(Actor::rider(RIDER), request.id(), PaymentMethod::Cash, None, bill + fee)
            .await
            .unwrap();
        pipeline
            .settlement
            .complete(Actor::admin(ADMIN), payment.id())
            .await
            .unwrap()
            .earning
    }

    fn replay(earning: &Earning) -> Accrual {
        Accrual {
            rider_id: earning.rider_id(),
            task_id: earning.task_id(),
            request_id: earning.request_id(),
            payment_id: earning.payment_id(),
            service_fee: earning.service_fee(),
            fee_earned: earning.fee_earned(),
            bonus: earning.bonus(),
        }
    }

    #[tokio::test]
    async fn test_accrue_is_idempotent_per_task() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let ledger = &h.pipeline.earnings;

        let again = ledger.accrue(Actor::admin(ADMIN), replay(&earning)).await.unwrap();
        assert_eq!(again, earning);

        let remittance = ledger.remittance(RIDER, h.clock.today()).await.unwrap().unwrap();
        assert_eq!(remittance.total_tasks(), 1);
        assert_eq!(remittance.rider_share(), money(dec!(35)));
        assert_eq!(remittance.platform_share(), money(dec!(15)));
    }

    #[tokio::test]
    async fn test_accrue_before_completion_is_rejected() {
        let h = harness();
        let (request, task) = completed_task(&h.pipeline, dec!(1000), dec!(50)).await;
        let payment = h
            .pipeline
            .settlement
            .record_payment(Actor::rider(RIDER), request.id(), PaymentMethod::Cash, None, dec!(1050))
            .await
            .unwrap();
        let ledger = &h.pipeline.earnings;
        let early = Accrual {
            rider_id: RIDER,
            task_id: task.id(),
            request_id: request.id(),
            payment_id: payment.id(),
            service_fee: money(dec!(50)),
            fee_earned: money(dec!(35)),
            bonus: Money::ZERO,
        };

        let err = ledger.accrue(Actor::admin(ADMIN), early).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        h.pipeline.settlement.verify(Actor::admin(ADMIN), payment.id()).await.unwrap();
        let err = ledger.accrue(Actor::admin(ADMIN), early).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        assert!(ledger.earnings_for_rider(RIDER).await.unwrap().is_empty());
        assert!(ledger.remittances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accrue_checks_caller_and_payment() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let ledger = &h.pipeline.earnings;

        let err = ledger.accrue(Actor::rider(RIDER), replay(&earning)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));

        let unknown = Accrual {
            payment_id: 999,
            ..replay(&earning)
        };
        let err = ledger.accrue(Actor::admin(ADMIN), unknown).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let other_task = Accrual {
            task_id: earning.task_id() + 1,
            ..replay(&earning)
        };
        let err = ledger.accrue(Actor::admin(ADMIN), other_task).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        let other_fee = Accrual {
            service_fee: money(dec!(60)),
            ..replay(&earning)
        };
        let err = ledger.accrue(Actor::admin(ADMIN), other_fee).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
        assert_eq!(ledger.earnings_for_rider(RIDER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_accrual_is_rejected() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let ledger = &h.pipeline.earnings;
        let inflated = Accrual {
            fee_earned: money(dec!(40)),
            ..replay(&earning)
        };
        let err = ledger.accrue(Actor::admin(ADMIN), inflated).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateAccrual(_)));
        assert!(err.is_integrity_violation());
        assert_eq!(ledger.earnings_for_rider(RIDER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accruals_roll_into_one_row_per_day() {
        let h = harness();
        settle(&h.pipeline, dec!(500), dec!(50)).await;
        settle(&h.pipeline, dec!(200), dec!(20)).await;
        h.clock.advance(Duration::days(1));
        settle(&h.pipeline, dec!(100), dec!(10)).await;

        let remittances = h.pipeline.earnings.remittances().await.unwrap();
        assert_eq!(remittances.len(), 2);
        assert_eq!(remittances[0].total_tasks(), 2);
        assert_eq!(remittances[0].total_service_fee(), money(dec!(70)));
        assert_eq!(remittances[1].total_tasks(), 1);
    }

    #[tokio::test]
    async fn test_close_remittance_rules() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let ledger = &h.pipeline.earnings;
        let day = earning.accrued_on();

        // The current day is still accruing.
        let err = ledger
            .close_remittance(Actor::admin(ADMIN), RIDER, day, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        h.clock.advance(Duration::days(1));
        let err = ledger
            .close_remittance(Actor::rider(RIDER), RIDER, day, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Forbidden(_)));

        let closed = ledger
            .close_remittance(Actor::admin(ADMIN), RIDER, day, Some("cash in hand".into()))
            .await
            .unwrap();
        assert_eq!(closed.status(), RemittanceStatus::Remitted);
        assert_eq!(closed.received_by(), Some(ADMIN));

        let err = ledger
            .close_remittance(Actor::admin(ADMIN), RIDER, day, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        let paid = ledger.mark_paid(Actor::admin(ADMIN), earning.id()).await.unwrap();
        assert_eq!(paid.payout_status(), PayoutStatus::Paid);
        assert!(h.notifier.sent_to(RIDER).await.contains(&EventKind::RemittanceClosed));
    }

    #[tokio::test]
    async fn test_waive_and_missing_remittance() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let ledger = &h.pipeline.earnings;
        let day = earning.accrued_on();
        h.clock.advance(Duration::days(2));

        let err = ledger
            .waive_remittance(Actor::admin(ADMIN), RIDER + 1, day, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let waived = ledger
            .waive_remittance(Actor::admin(ADMIN), RIDER, day, Some("goodwill".into()))
            .await
            .unwrap();
        assert_eq!(waived.status(), RemittanceStatus::Waived);
        assert_eq!(ledger.remittances_on(day).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_requires_release() {
        let h = harness();
        let earning = settle(&h.pipeline, dec!(1000), dec!(50)).await;
        let err = h
            .pipeline
            .earnings
            .mark_paid(Actor::admin(ADMIN), earning.id())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));
    }
}
