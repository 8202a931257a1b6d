//! Fallback reconciler.
//!
//! Streams can go quiet without anyone noticing: an outage upstream, a
//! subscription silently dropped, a market that just stopped printing. The
//! reconciler is the safety net, sweeping every monitored position on a slow
//! timer with a direct quote fetch and pushing the result through the same
//! evaluator path live ticks take. Fetch errors are logged and skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{InstrumentKey, PositionStatus, StreamKind};
use crate::monitor::evaluator::PositionEvaluator;
use crate::store::{PositionStore, StatusFilter};
use crate::stream::QuoteFetcher;

pub struct FallbackReconciler {
    store: Arc<PositionStore>,
    evaluator: Arc<PositionEvaluator>,
    quotes: Arc<dyn QuoteFetcher>,
    interval: Duration,
}

impl FallbackReconciler {
    #[must_use]
    pub fn new(
        store: Arc<PositionStore>,
        evaluator: Arc<PositionEvaluator>,
        quotes: Arc<dyn QuoteFetcher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            evaluator,
            quotes,
            interval,
        }
    }

    /// Sweep forever on the configured interval.
    pub async fn run(self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh start does
        // not double-evaluate positions the live stream is already covering.
        timer.tick().await;
        loop {
            timer.tick().await;
            self.sweep().await;
        }
    }

    /// One full pass over every monitored position.
    pub async fn sweep(&self) {
        let mut keys: HashSet<(StreamKind, InstrumentKey)> = HashSet::new();
        for position in self.store.list(StatusFilter::Active) {
            if !matches!(
                position.status,
                PositionStatus::Monitoring | PositionStatus::Reevaluating
            ) {
                continue;
            }
            for (kind, key) in position.subscriptions() {
                // Venue fill state has no quote to fetch
                if kind != StreamKind::VenueFills {
                    keys.insert((kind, key));
                }
            }
        }

        debug!(keys = keys.len(), "Reconciler sweep");
        for (kind, key) in keys {
            match self.quotes.fetch(kind, &key).await {
                Ok(tick) => self.evaluator.handle_tick(&tick).await,
                Err(e) => {
                    warn!(stream = %kind, key = %key, error = %e, "Fallback quote fetch failed");
                }
            }
        }
    }
}
