use super::Context;
use super::dispatcher::{EligibilityGate, TaskDispatcher};
use super::earnings::EarningsLedger;
use super::ratings::RatingAggregator;
use super::requests::RequestLedger;
use super::settlement::SettlementEngine;
use crate::domain::money::SharePolicy;
use crate::domain::ports::{Clock, MediaStore, Notifier, SharedLedgerStore};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::media::InMemoryMediaStore;
use crate::infrastructure::notifier::LogNotifier;
use std::sync::Arc;

/// The main entry point of the dispatch and settlement pipeline.
///
/// All five components share one store, so they can be used from any number
/// of concurrent tasks. `Clone` is cheap and shares everything.
#[derive(Clone)]
pub struct Pipeline {
    pub requests: RequestLedger,
    pub dispatcher: TaskDispatcher,
    pub settlement: SettlementEngine,
    pub earnings: EarningsLedger,
    pub ratings: RatingAggregator,
}

impl Pipeline {
    /// A pipeline over `store` with the system clock, a logging notifier, an
    /// in-memory media store and the default 70/30 split.
    pub fn new(store: SharedLedgerStore) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: SharedLedgerStore) -> PipelineBuilder {
        PipelineBuilder {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            media: Arc::new(InMemoryMediaStore::new()),
            policy: SharePolicy::default(),
            gate: None,
        }
    }
}

pub struct PipelineBuilder {
    store: SharedLedgerStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    media: Arc<dyn MediaStore>,
    policy: SharePolicy,
    gate: Option<EligibilityGate>,
}

impl PipelineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaStore>) -> Self {
        self.media = media;
        self
    }

    pub fn share_policy(mut self, policy: SharePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn eligibility_gate(mut self, gate: EligibilityGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn maybe_eligibility_gate(mut self, gate: Option<EligibilityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn build(self) -> Pipeline {
        let ctx = Context {
            store: self.store,
            clock: self.clock,
            notifier: self.notifier,
            media: self.media,
        };
        let ratings = RatingAggregator::new(ctx.clone());
        let earnings = EarningsLedger::new(ctx.clone());
        Pipeline {
            requests: RequestLedger::new(ctx.clone()),
            dispatcher: TaskDispatcher::new(ctx.clone(), ratings.clone(), self.gate),
            settlement: SettlementEngine::new(ctx, earnings.clone(), self.policy),
            earnings,
            ratings,
        }
    }
}
