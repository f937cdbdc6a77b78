use super::earnings::{ACCRUAL_ATTEMPTS, EarningsLedger, Staged};
use super::{Context, applied, violation_error};
use crate::domain::actor::{Actor, Role};
use crate::domain::earning::{Accrual, Earning};
use crate::domain::money::{Money, SharePolicy, Split};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{ChangeSet, Commit, EventKind, MediaCategory, Violation};
use crate::domain::request::{PaymentMethod, RequestId, RequestStatus};
use crate::error::{EntityKind, EntityRef, PipelineError, Result};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// A completed payment and the earning it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub payment: Payment,
    pub earning: Earning,
}

impl Settlement {
    pub fn split(&self) -> Split {
        Split {
            rider_share: self.earning.fee_earned(),
            platform_share: self.earning.platform_share(),
        }
    }
}

/// Records and reconciles the money collected for a completed task.
#[derive(Clone)]
pub struct SettlementEngine {
    ctx: Context,
    earnings: EarningsLedger,
    policy: SharePolicy,
}

impl SettlementEngine {
    pub fn new(ctx: Context, earnings: EarningsLedger, policy: SharePolicy) -> Self {
        Self {
            ctx,
            earnings,
            policy,
        }
    }

    pub fn policy(&self) -> SharePolicy {
        self.policy
    }

    /// Records what the rider collected against a request awaiting payment.
    ///
    /// `collected` must equal bill amount plus service fee exactly. On a
    /// mismatch nothing is written and `AmountMismatch` is returned.
    pub async fn record_payment(
        &self,
        actor: Actor,
        request_id: RequestId,
        method: PaymentMethod,
        reference: Option<String>,
        collected: Decimal,
    ) -> Result<Payment> {
        let request = self.ctx.load_request(request_id).await?;
        let task = self
            .ctx
            .store
            .tasks_for_request(request_id)
            .await?
            .into_iter()
            .max_by_key(|t| t.id())
            .ok_or(PipelineError::InvalidState(request.entity()))?;
        if !actor.is_admin() && !(actor.role == Role::Rider && task.is_bound_to(actor.id)) {
            return Err(PipelineError::Forbidden(request.entity()));
        }
        if request.status() != RequestStatus::PaymentProcessing {
            return Err(PipelineError::InvalidState(request.entity()));
        }
        let payments = self.ctx.store.payments_for_request(request_id).await?;
        if payments.iter().any(Payment::is_open) {
            return Err(PipelineError::InvalidState(request.entity()));
        }

        let collected = Money::new(collected)?;
        if collected != request.total() {
            error!(
                request_id,
                %collected,
                expected = %request.total(),
                "collected amount does not reconcile"
            );
            return Err(PipelineError::AmountMismatch(request.entity()));
        }

        let id = self.ctx.store.allocate_id(EntityKind::Payment).await?;
        let payment = Payment::record(
            id,
            &request,
            &task,
            method,
            reference,
            collected,
            self.ctx.clock.now(),
        )?;
        applied(self.ctx.store.commit(ChangeSet::new().payment(payment)).await?)?;

        info!(payment_id = id, request_id, %collected, attempt = payments.len() + 1, "payment recorded");
        self.ctx
            .notify(
                request.customer_id(),
                EventKind::PaymentRecorded,
                json!({ "payment_id": id, "request_id": request_id, "amount": collected }),
            )
            .await;
        self.ctx.load_payment(id).await
    }

    pub async fn verify(&self, actor: Actor, payment_id: PaymentId) -> Result<Payment> {
        let mut payment = self.ctx.load_payment(payment_id).await?;
        actor.require(Role::Admin, payment.entity())?;
        payment.verify(self.ctx.clock.now())?;
        applied(self.ctx.store.commit(ChangeSet::new().payment(payment)).await?)?;
        info!(payment_id, "payment verified");
        self.ctx.load_payment(payment_id).await
    }

    /// Completes a payment, closes its request and accrues the rider's share,
    /// all in one write.
    ///
    /// Completing an already completed payment returns the settlement on
    /// record without accruing again.
    pub async fn complete(&self, actor: Actor, payment_id: PaymentId) -> Result<Settlement> {
        actor.require(Role::Admin, EntityRef::payment(payment_id))?;

        for attempt in 1..=ACCRUAL_ATTEMPTS {
            let mut payment = self.ctx.load_payment(payment_id).await?;
            if payment.status() == PaymentStatus::Completed {
                return self.settlement_for(payment).await;
            }
            let mut request = self.ctx.load_request(payment.request_id()).await?;
            if request.status() == RequestStatus::Completed {
                // Another completion landed after the payment was read.
                debug!(attempt, payment_id, "completion raced, retrying");
                continue;
            }
            let now = self.ctx.clock.now();
            payment.complete(now)?;
            request.complete(now)?;

            let accrual = self.accrual_for(&payment);
            let mut changes = ChangeSet::new().payment(payment).request(request);
            if let Staged::New { earning, remittance } = self.earnings.stage(&accrual, now).await? {
                changes = changes.earning(earning).remittance(remittance);
            }

            match self.ctx.store.commit(changes).await? {
                Commit::Applied => {
                    let payment = self.ctx.load_payment(payment_id).await?;
                    let settlement = self.settlement_for(payment).await?;
                    let split = settlement.split();
                    info!(
                        payment_id,
                        request_id = settlement.payment.request_id(),
                        rider_share = %split.rider_share,
                        platform_share = %split.platform_share,
                        "payment completed"
                    );
                    self.announce_completion(&settlement).await;
                    return Ok(settlement);
                }
                Commit::Stale(_)
                | Commit::Violated(Violation::EarningForTask(_))
                | Commit::Violated(Violation::RemittanceForDay(..)) => {
                    debug!(attempt, payment_id, "completion raced, retrying");
                }
                Commit::Violated(violation) => return Err(violation_error(violation)),
            }
        }
        Err(PipelineError::Conflict(EntityRef::payment(payment_id)))
    }

    /// Marks a payment failed. The request stays `payment_processing` and
    /// accepts a new payment attempt.
    pub async fn fail(&self, actor: Actor, payment_id: PaymentId, reason: impl Into<String>) -> Result<Payment> {
        let mut payment = self.ctx.load_payment(payment_id).await?;
        actor.require(Role::Admin, payment.entity())?;
        let reason = reason.into();
        payment.fail(reason.clone())?;
        let rider_id = payment.rider_id();
        applied(self.ctx.store.commit(ChangeSet::new().payment(payment)).await?)?;

        warn!(payment_id, %reason, "payment failed");
        self.ctx
            .notify(
                rider_id,
                EventKind::PaymentFailed,
                json!({ "payment_id": payment_id, "reason": reason }),
            )
            .await;
        self.ctx.load_payment(payment_id).await
    }

    /// Uploads a receipt for a payment and records its URL.
    pub async fn attach_receipt(&self, actor: Actor, payment_id: PaymentId, bytes: Vec<u8>) -> Result<Payment> {
        let mut payment = self.ctx.load_payment(payment_id).await?;
        actor.require_owner_or_admin(Role::Rider, payment.rider_id(), payment.entity())?;
        if payment.status() == PaymentStatus::Failed {
            return Err(PipelineError::InvalidState(payment.entity()));
        }
        let url = self.ctx.media.store(bytes, MediaCategory::PaymentReceipt).await?;
        payment.attach_receipt(url)?;
        applied(self.ctx.store.commit(ChangeSet::new().payment(payment)).await?)?;
        self.ctx.load_payment(payment_id).await
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.ctx.load_payment(payment_id).await
    }

    pub async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        self.ctx.store.payments_for_request(request_id).await
    }

    fn accrual_for(&self, payment: &Payment) -> Accrual {
        let split = self.policy.split(payment.service_fee());
        Accrual {
            rider_id: payment.rider_id(),
            task_id: payment.task_id(),
            request_id: payment.request_id(),
            payment_id: payment.id(),
            service_fee: payment.service_fee(),
            fee_earned: split.rider_share,
            bonus: Money::ZERO,
        }
    }

    async fn settlement_for(&self, payment: Payment) -> Result<Settlement> {
        let earning = self
            .ctx
            .store
            .earning_for_task(payment.task_id())
            .await?
            .ok_or_else(|| {
                PipelineError::InternalError(Box::new(std::io::Error::other(format!(
                    "completed {} has no earning",
                    payment.entity()
                ))))
            })?;
        Ok(Settlement { payment, earning })
    }

    async fn announce_completion(&self, settlement: &Settlement) {
        let payment = &settlement.payment;
        let payload = json!({
            "payment_id": payment.id(),
            "request_id": payment.request_id(),
            "total": payment.total_collected(),
        });
        self.ctx
            .notify(payment.customer_id(), EventKind::PaymentCompleted, payload.clone())
            .await;
        self.ctx
            .notify(payment.rider_id(), EventKind::PaymentCompleted, payload)
            .await;
    }
}
