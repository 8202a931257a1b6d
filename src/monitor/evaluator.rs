//! Position evaluator: the decision path every tick flows through.
//!
//! Cheap Level-1 checks run on each tick: direct exit-policy breaches
//! (stop-loss, take-profit, spread convergence, max age), the prediction
//! edge-inversion check, and price drift against the last checked reference.
//! Only when a tick escalates does the throttled Level-2 estimator run, and
//! only its fresh edge can trigger an estimator-gated exit.
//!
//! All store writes go through compare-and-swap transitions; a lost race
//! means another tick handled the position and this path drops out quietly.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::StrategiesConfig;
use crate::domain::{
    Position, PositionStatus, StrategyKind, Side, Tick, TickPayload,
};
use crate::exec::ExecutionGateway;
use crate::monitor::prices::PriceCache;
use crate::monitor::throttle::{EstimationThrottle, ThrottleOutcome};
use crate::notify::{CloseEvent, Event, NotifierRegistry, PositionEvent};
use crate::store::PositionStore;

pub struct PositionEvaluator {
    store: Arc<PositionStore>,
    throttle: EstimationThrottle,
    gateway: Arc<dyn ExecutionGateway>,
    notifiers: Arc<NotifierRegistry>,
    strategies: StrategiesConfig,
    prices: Arc<PriceCache>,
    close_retries: u32,
    execution_timeout: std::time::Duration,
}

impl PositionEvaluator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<PositionStore>,
        throttle: EstimationThrottle,
        gateway: Arc<dyn ExecutionGateway>,
        notifiers: Arc<NotifierRegistry>,
        strategies: StrategiesConfig,
        prices: Arc<PriceCache>,
        close_retries: u32,
        execution_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            throttle,
            gateway,
            notifiers,
            strategies,
            prices,
            close_retries,
            execution_timeout,
        }
    }

    /// Entry point for both live ticks and reconciler sweeps.
    pub async fn handle_tick(&self, tick: &Tick) {
        self.prices.record(tick);
        for position in self.store.positions_for_key(tick.kind, &tick.key) {
            self.evaluate(&position, tick).await;
        }
    }

    async fn evaluate(&self, position: &Position, tick: &Tick) {
        // Reevaluating and Closing positions are owned by another task;
        // Open positions wait for the coordinator's promotion.
        if position.status != PositionStatus::Monitoring {
            return;
        }

        if matches!(tick.payload, TickPayload::VenueFlat) {
            self.settle_external(position).await;
            return;
        }
        let Some(price) = tick.price() else {
            return;
        };

        if let Some(reason) = self.direct_exit_reason(position, price) {
            info!(position_id = %position.id, reason = %reason, "Exit threshold breached");
            self.close_position(position, PositionStatus::Monitoring, &reason)
                .await;
            return;
        }

        let policy = self.strategies.policy(position.strategy);
        let reference = position.reference_price();
        let drift = if reference.is_zero() {
            Decimal::ZERO
        } else {
            ((price - reference) / reference).abs()
        };
        let inverted = edge_inverted(position, price);

        if drift < policy.reeval_trigger_pct && !inverted {
            self.ratchet(position, price);
            return;
        }

        if !position.strategy.uses_estimator() {
            // Threshold strategies exit on direct breaches only; drift is
            // just a new reference.
            self.ratchet(position, price);
            return;
        }

        let trigger = if inverted {
            format!("price {price} crossed estimated probability")
        } else {
            format!("price drift {:.2}% from {reference}", drift * Decimal::ONE_HUNDRED)
        };
        debug!(position_id = %position.id, trigger = %trigger, "Escalating to Level-2");

        match self.throttle.maybe_reevaluate(position, price, &trigger).await {
            Ok(ThrottleOutcome::Completed(estimate)) => {
                self.apply_estimate(position, estimate.edge, price).await;
            }
            Ok(ThrottleOutcome::Deferred(reason)) => {
                debug!(position_id = %position.id, reason = ?reason, "Re-evaluation deferred");
            }
            Ok(ThrottleOutcome::EstimationFailed) => {
                self.notifiers.notify_all(Event::Alert(PositionEvent {
                    position_id: position.id.clone(),
                    strategy: position.strategy,
                    last_edge: Some(position.thesis.edge),
                    reason: "estimation failed; holding position".to_string(),
                }));
            }
            Err(e) => {
                error!(position_id = %position.id, error = %e, "Re-evaluation error");
            }
        }
    }

    /// Act on a fresh estimate while holding `Reevaluating`.
    async fn apply_estimate(&self, position: &Position, edge: Decimal, price: Decimal) {
        if let Some(floor) = position.exit_policy.edge_floor {
            if edge < floor {
                let reason = format!("edge {edge} below floor {floor}");
                info!(position_id = %position.id, reason = %reason, "Closing on thin edge");
                self.close_position(position, PositionStatus::Reevaluating, &reason)
                    .await;
                return;
            }
        }

        if let Some(alert_edge) = position.exit_policy.alert_edge {
            if edge < alert_edge {
                self.notifiers.notify_all(Event::Alert(PositionEvent {
                    position_id: position.id.clone(),
                    strategy: position.strategy,
                    last_edge: Some(edge),
                    reason: format!("edge {edge} thin at price {price}; holding"),
                }));
            }
        }

        if let Err(e) = self.store.transition(
            &position.id,
            PositionStatus::Reevaluating,
            PositionStatus::Monitoring,
        ) {
            if !e.is_transition_conflict() {
                error!(position_id = %position.id, error = %e, "Failed to resume monitoring");
            }
        }
    }

    /// Direct exit-policy breach for the tick price, if any.
    fn direct_exit_reason(&self, position: &Position, price: Decimal) -> Option<String> {
        let policy = &position.exit_policy;

        if let Some(max_age) = policy.max_age_secs {
            let age = position.age().num_seconds();
            if age >= 0 && age as u64 >= max_age {
                return Some(format!("max age {max_age}s exceeded"));
            }
        }

        let leg = position.primary_leg();
        let notional = leg.notional();
        if !notional.is_zero() {
            let pnl_pct = leg.pnl_at(price) / notional;
            if let Some(sl) = policy.stop_loss_pct {
                if pnl_pct <= -sl {
                    return Some(format!("stop loss hit ({pnl_pct:.4})"));
                }
            }
            if let Some(tp) = policy.take_profit_pct {
                if pnl_pct >= tp {
                    return Some(format!("take profit hit ({pnl_pct:.4})"));
                }
            }
        }

        if position.strategy == StrategyKind::Spread && position.legs.len() >= 2 {
            if let Some(spread_pct) = self.spread_pct(position) {
                if let Some(close_at) = policy.spread_close_pct {
                    if spread_pct <= close_at {
                        return Some(format!("spread converged to {spread_pct:.4}%"));
                    }
                }
                if let Some(profit_at) = policy.spread_profit_pct {
                    if spread_pct >= profit_at {
                        return Some(format!("spread profit take at {spread_pct:.4}%"));
                    }
                }
            }
        }

        None
    }

    /// Inter-venue spread in percent units, from cached quotes of both legs.
    fn spread_pct(&self, position: &Position) -> Option<Decimal> {
        let buy = self.prices.mid(&position.legs[0].instrument)?;
        let sell = self.prices.mid(&position.legs[1].instrument)?;
        if sell.is_zero() {
            return None;
        }
        Some(((buy - sell) / sell * Decimal::ONE_HUNDRED).abs())
    }

    fn ratchet(&self, position: &Position, price: Decimal) {
        if let Err(e) = self
            .store
            .update(&position.id, |p| p.last_check_price = Some(price))
        {
            if !e.is_transition_conflict() {
                debug!(position_id = %position.id, error = %e, "Ratchet skipped");
            }
        }
    }

    /// The venue itself flattened the position (exchange-side TP/SL). No
    /// order to send; record the exit against the last cached price.
    async fn settle_external(&self, position: &Position) {
        if self
            .store
            .transition(&position.id, position.status, PositionStatus::Closing)
            .is_err()
        {
            return;
        }

        let mut pnl = Decimal::ZERO;
        let mut fill_price = position.primary_leg().entry_price;
        for (i, leg) in position.legs.iter().enumerate() {
            let price = self.prices.mid(&leg.instrument).unwrap_or(leg.entry_price);
            pnl += leg.pnl_at(price);
            if i == 0 {
                fill_price = price;
            }
        }

        let reason = "venue closed position (tp/sl)";
        match self.store.transition_with(
            &position.id,
            PositionStatus::Closing,
            PositionStatus::Closed,
            |p| {
                p.realized_pnl = Some(pnl);
                p.closed_at = Some(Utc::now());
                p.close_reason = Some(reason.to_string());
            },
        ) {
            Ok(_) => {
                self.notifiers.notify_all(Event::PositionClosed(CloseEvent {
                    position_id: position.id.clone(),
                    strategy: position.strategy,
                    reason: reason.to_string(),
                    fill_price,
                    realized_pnl: pnl,
                }));
            }
            Err(e) => {
                error!(position_id = %position.id, error = %e, "Failed to record external close");
            }
        }
    }

    /// Claim the position for closing and submit with bounded retries.
    /// Losing the claim means another path is already closing it.
    async fn close_position(&self, position: &Position, from: PositionStatus, reason: &str) {
        let position = match self
            .store
            .transition(&position.id, from, PositionStatus::Closing)
        {
            Ok(p) => p,
            Err(e) => {
                if !e.is_transition_conflict() {
                    error!(position_id = %position.id, error = %e, "Failed to claim close");
                }
                return;
            }
        };

        for attempt in 1..=self.close_retries {
            let submit = tokio::time::timeout(
                self.execution_timeout,
                self.gateway.submit_close(&position.id, &position.legs),
            )
            .await;

            match submit {
                Ok(Ok(receipt)) => {
                    match self.store.transition_with(
                        &position.id,
                        PositionStatus::Closing,
                        PositionStatus::Closed,
                        |p| {
                            p.realized_pnl = Some(receipt.realized_pnl);
                            p.closed_at = Some(Utc::now());
                            p.close_reason = Some(reason.to_string());
                        },
                    ) {
                        Ok(_) => {
                            self.notifiers.notify_all(Event::PositionClosed(CloseEvent {
                                position_id: position.id.clone(),
                                strategy: position.strategy,
                                reason: reason.to_string(),
                                fill_price: receipt.fill_price,
                                realized_pnl: receipt.realized_pnl,
                            }));
                        }
                        Err(e) => {
                            // Someone else finalized it while we were filling
                            warn!(position_id = %position.id, error = %e, "Close finalization skipped");
                        }
                    }
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        position_id = %position.id,
                        attempt,
                        error = %e,
                        "Close submission failed"
                    );
                }
                Err(_) => {
                    warn!(
                        position_id = %position.id,
                        attempt,
                        timeout_secs = self.execution_timeout.as_secs(),
                        "Close submission timed out"
                    );
                }
            }

            // Abandon if the position left Closing while we were away
            match self.store.get(&position.id) {
                Ok(p) if p.status == PositionStatus::Closing => {}
                _ => return,
            }

            if attempt < self.close_retries {
                tokio::time::sleep(std::time::Duration::from_millis(100 * u64::from(attempt)))
                    .await;
            }
        }

        let reason_failed = format!("{reason}; close retries exhausted");
        match self.store.transition_with(
            &position.id,
            PositionStatus::Closing,
            PositionStatus::Failed,
            |p| {
                p.close_reason = Some(reason_failed.clone());
            },
        ) {
            Ok(_) => {
                self.notifiers.notify_all(Event::PositionFailed(PositionEvent {
                    position_id: position.id.clone(),
                    strategy: position.strategy,
                    last_edge: Some(position.thesis.edge),
                    reason: reason_failed,
                }));
            }
            Err(e) => {
                error!(position_id = %position.id, error = %e, "Failed to mark position failed");
            }
        }
    }
}

/// Prediction positions: true when the market price has crossed the
/// estimated probability, i.e. the thesis edge has gone non-positive.
fn edge_inverted(position: &Position, price: Decimal) -> bool {
    if !position.strategy.uses_estimator() {
        return false;
    }
    let Some(probability) = position.thesis.probability else {
        return false;
    };
    match position.primary_leg().side {
        Side::Long => price >= probability,
        Side::Short => price <= probability,
    }
}
