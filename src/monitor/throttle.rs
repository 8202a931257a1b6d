//! Estimation throttle.
//!
//! Level-2 estimation is slow and costs money, so every request passes two
//! gates before the estimator runs: a per-strategy cooldown measured against
//! `last_evaluated_at`, and the `Monitoring -> Reevaluating` compare-and-swap
//! that guarantees at most one in-flight estimation per position. Losing the
//! swap is not an error; it means another tick got there first.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::StrategiesConfig;
use crate::domain::{Position, PositionStatus};
use crate::error::Result;
use crate::estimator::{Estimate, EstimateContext, Estimator};
use crate::store::PositionStore;

/// Why a re-evaluation did not run.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    /// Inside the cooldown window.
    Cooldown { remaining_secs: i64 },
    /// Another task already holds the position in `Reevaluating`.
    LostRace,
    /// Position is terminal or already exiting.
    NotMonitoring,
}

/// Outcome of [`EstimationThrottle::maybe_reevaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleOutcome {
    /// Estimation completed; the position is still `Reevaluating` and the
    /// caller owns the follow-up transition.
    Completed(Estimate),
    Deferred(DeferReason),
    /// The estimator errored or timed out. The position has been returned
    /// to `Monitoring`; no exit decision may be taken.
    EstimationFailed,
}

pub struct EstimationThrottle {
    store: Arc<PositionStore>,
    estimator: Arc<dyn Estimator>,
    strategies: StrategiesConfig,
    timeout: Duration,
}

impl EstimationThrottle {
    #[must_use]
    pub fn new(
        store: Arc<PositionStore>,
        estimator: Arc<dyn Estimator>,
        strategies: StrategiesConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            estimator,
            strategies,
            timeout,
        }
    }

    /// Run a Level-2 re-evaluation if the gates allow it.
    ///
    /// On `Completed` the position is left in `Reevaluating` with its thesis
    /// refreshed; the caller decides close/alert/hold and performs the final
    /// transition. On failure the status reverts to `Monitoring`.
    pub async fn maybe_reevaluate(
        &self,
        position: &Position,
        current_price: Decimal,
        trigger: &str,
    ) -> Result<ThrottleOutcome> {
        if !matches!(position.status, PositionStatus::Monitoring) {
            return Ok(ThrottleOutcome::Deferred(DeferReason::NotMonitoring));
        }

        let cooldown = self.strategies.policy(position.strategy).cooldown();
        if let Some(last) = position.last_evaluated_at {
            let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).as_secs() as i64;
                debug!(
                    position_id = %position.id,
                    remaining_secs = remaining,
                    "Re-evaluation inside cooldown window"
                );
                return Ok(ThrottleOutcome::Deferred(DeferReason::Cooldown {
                    remaining_secs: remaining,
                }));
            }
        }

        // The exclusivity gate. Exactly one caller wins this swap.
        match self.store.transition(
            &position.id,
            PositionStatus::Monitoring,
            PositionStatus::Reevaluating,
        ) {
            Ok(_) => {}
            Err(e) if e.is_transition_conflict() => {
                debug!(position_id = %position.id, "Lost re-evaluation race");
                return Ok(ThrottleOutcome::Deferred(DeferReason::LostRace));
            }
            Err(crate::error::Error::Store(crate::error::StoreError::Terminal { .. })) => {
                return Ok(ThrottleOutcome::Deferred(DeferReason::NotMonitoring));
            }
            Err(e) => return Err(e),
        }

        let ctx = EstimateContext {
            position_id: position.id.clone(),
            strategy: position.strategy,
            instrument: position.primary_leg().instrument.clone(),
            question: position.description.clone(),
            entry_price: position.primary_leg().entry_price,
            current_price,
            thesis_probability: position.thesis.probability,
            thesis_rationale: position.thesis.rationale.clone(),
            trigger: trigger.to_string(),
        };

        let outcome = tokio::time::timeout(self.timeout, self.estimator.estimate(&ctx)).await;
        match outcome {
            Ok(Ok(estimate)) => {
                let now = Utc::now();
                self.store.update(&position.id, |p| {
                    p.last_evaluated_at = Some(now);
                    p.last_check_price = Some(current_price);
                    p.thesis.probability = Some(estimate.probability);
                    p.thesis.edge = estimate.edge;
                    p.thesis.rationale = estimate.rationale.clone();
                    p.thesis.reference_price = current_price;
                    p.thesis.taken_at = now;
                })?;
                Ok(ThrottleOutcome::Completed(estimate))
            }
            Ok(Err(e)) => {
                warn!(
                    position_id = %position.id,
                    estimator = self.estimator.name(),
                    error = %e,
                    "Estimation failed, reverting to monitoring"
                );
                self.revert(position);
                Ok(ThrottleOutcome::EstimationFailed)
            }
            Err(_) => {
                warn!(
                    position_id = %position.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Estimation timed out, reverting to monitoring"
                );
                self.revert(position);
                Ok(ThrottleOutcome::EstimationFailed)
            }
        }
    }

    /// Best-effort revert of the exclusivity swap. A conflict here means
    /// something else already moved the position on; leave it be.
    fn revert(&self, position: &Position) {
        if let Err(e) = self.store.transition(
            &position.id,
            PositionStatus::Reevaluating,
            PositionStatus::Monitoring,
        ) {
            if !e.is_transition_conflict() {
                warn!(position_id = %position.id, error = %e, "Failed to revert re-evaluation");
            }
        }
    }
}
