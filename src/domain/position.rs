//! Position lifecycle types.
//!
//! A `Position` is an opened trade under monitoring. Its status moves through
//! the lifecycle machine enforced by the store's compare-and-swap transition;
//! legs and entry data are immutable after open.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{InstrumentKey, PositionId, Venue};
use super::tick::StreamKind;

/// Strategy family a position belongs to. Also the exposure category
/// for risk caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Directional prediction-market positions held on a probability thesis.
    Prediction,
    /// Short-horizon prediction-market entries on crypto price moves.
    MicroArb,
    /// Delta-neutral funding-rate capture on a perp venue.
    FundingArb,
    /// Cross-venue spread capture on the same asset.
    Spread,
}

impl StrategyKind {
    /// Strategies whose re-evaluation goes through the Level-2 estimator.
    /// Threshold strategies exit on direct price rules only.
    #[must_use]
    pub fn uses_estimator(&self) -> bool {
        matches!(self, StrategyKind::Prediction | StrategyKind::MicroArb)
    }

    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Prediction,
        StrategyKind::MicroArb,
        StrategyKind::FundingArb,
        StrategyKind::Spread,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Prediction => "prediction",
            StrategyKind::MicroArb => "micro_arb",
            StrategyKind::FundingArb => "funding_arb",
            StrategyKind::Spread => "spread",
        };
        write!(f, "{s}")
    }
}

/// Direction of a leg. A YES prediction-market token is `Long`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

/// One leg of a position: what rests where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLeg {
    pub venue: Venue,
    pub instrument: InstrumentKey,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
}

impl PositionLeg {
    /// Notional value at entry.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.size
    }

    /// Signed pnl of this leg at the given price.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let diff = price - self.entry_price;
        match self.side {
            Side::Long => diff * self.size,
            Side::Short => -diff * self.size,
        }
    }
}

/// Why the position was opened, frozen at open and refreshed only by a
/// completed Level-2 re-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThesisSnapshot {
    /// Estimated true probability (prediction strategies only).
    pub probability: Option<Decimal>,
    /// Edge at the time of the estimate, as a fraction.
    pub edge: Decimal,
    pub rationale: String,
    /// Price the thesis was formed against.
    pub reference_price: Decimal,
    pub taken_at: DateTime<Utc>,
}

/// Per-position exit rules, fixed at open from strategy config.
/// Percentage fields are fractions of entry price unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExitPolicy {
    /// Close when a fresh estimate's edge falls below this.
    pub edge_floor: Option<Decimal>,
    /// Alert (but hold) when a fresh estimate's edge falls below this.
    pub alert_edge: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    /// Spread positions: close when the inter-venue spread, in percent
    /// units, converges to or below this.
    pub spread_close_pct: Option<Decimal>,
    /// Spread positions: take profit when the spread widens to this.
    pub spread_profit_pct: Option<Decimal>,
    /// Hard age limit.
    pub max_age_secs: Option<u64>,
}

/// Lifecycle states. Terminal states reject all further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Sized and approved, not yet submitted.
    Candidate,
    /// Entry submitted, awaiting fill confirmation.
    PendingConfirmation,
    /// Filled; awaiting stream subscription.
    Open,
    /// Live under stream surveillance.
    Monitoring,
    /// A Level-2 estimation is in flight. At most one holder.
    Reevaluating,
    /// Exit decided; close order in progress.
    Closing,
    /// Terminal: flat, pnl realized.
    Closed,
    /// Terminal: close attempts exhausted, manual intervention needed.
    Failed,
}

impl PositionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Failed)
    }

    /// Active positions hold live exposure and drive stream subscriptions.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PositionStatus::Open
                | PositionStatus::Monitoring
                | PositionStatus::Reevaluating
                | PositionStatus::Closing
        )
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Candidate => "candidate",
            PositionStatus::PendingConfirmation => "pending_confirmation",
            PositionStatus::Open => "open",
            PositionStatus::Monitoring => "monitoring",
            PositionStatus::Reevaluating => "reevaluating",
            PositionStatus::Closing => "closing",
            PositionStatus::Closed => "closed",
            PositionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A tracked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub strategy: StrategyKind,
    pub status: PositionStatus,
    /// Human-readable label: the market question for prediction positions,
    /// the pair for the rest. Feeds re-estimation prompts and alerts.
    #[serde(default)]
    pub description: String,
    pub legs: Vec<PositionLeg>,
    pub thesis: ThesisSnapshot,
    pub exit_policy: ExitPolicy,
    pub opened_at: DateTime<Utc>,
    /// When the last Level-2 estimation completed. Drives the throttle
    /// cooldown.
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Last price a Level-1 check was measured against. Ratchets forward
    /// on every in-tolerance tick so drift is cumulative, not per-tick.
    pub last_check_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    pub close_reason: Option<String>,
}

impl Position {
    /// Open a new position in `Open` status, awaiting subscription.
    #[must_use]
    pub fn open(
        strategy: StrategyKind,
        legs: Vec<PositionLeg>,
        thesis: ThesisSnapshot,
        exit_policy: ExitPolicy,
    ) -> Self {
        Self {
            id: PositionId::generate(),
            strategy,
            status: PositionStatus::Open,
            description: String::new(),
            legs,
            thesis,
            exit_policy,
            opened_at: Utc::now(),
            last_evaluated_at: None,
            last_check_price: None,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The leg whose instrument anchors exposure dedupe and Level-1 checks.
    #[must_use]
    pub fn primary_leg(&self) -> &PositionLeg {
        // Positions always carry at least one leg; enforced at open.
        &self.legs[0]
    }

    /// Total entry notional across legs.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.legs.iter().map(PositionLeg::notional).sum()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        Utc::now() - self.opened_at
    }

    /// Level-1 reference: last checked price, falling back to the thesis.
    #[must_use]
    pub fn reference_price(&self) -> Decimal {
        self.last_check_price
            .unwrap_or(self.thesis.reference_price)
    }

    /// Stream subscriptions this position requires while active.
    /// Every leg needs its venue's price feed; funding positions also
    /// watch venue fills to catch exchange-side TP/SL exits.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(StreamKind, InstrumentKey)> {
        let mut subs: Vec<(StreamKind, InstrumentKey)> = self
            .legs
            .iter()
            .map(|leg| (StreamKind::for_venue(leg.venue), leg.instrument.clone()))
            .collect();
        if self.strategy == StrategyKind::FundingArb {
            for leg in &self.legs {
                subs.push((StreamKind::VenueFills, leg.instrument.clone()));
            }
        }
        subs.dedup();
        subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn thesis(edge: Decimal, price: Decimal) -> ThesisSnapshot {
        ThesisSnapshot {
            probability: Some(dec!(0.55)),
            edge,
            rationale: "test".to_string(),
            reference_price: price,
            taken_at: Utc::now(),
        }
    }

    fn leg(venue: Venue, key: &str) -> PositionLeg {
        PositionLeg {
            venue,
            instrument: key.into(),
            side: Side::Long,
            entry_price: dec!(0.45),
            size: dec!(100),
        }
    }

    #[test]
    fn terminal_and_active_partition() {
        assert!(PositionStatus::Closed.is_terminal());
        assert!(PositionStatus::Failed.is_terminal());
        assert!(!PositionStatus::Monitoring.is_terminal());
        assert!(PositionStatus::Closing.is_active());
        assert!(!PositionStatus::Candidate.is_active());
        assert!(!PositionStatus::Closed.is_active());
    }

    #[test]
    fn leg_pnl_respects_side() {
        let long = leg(Venue::Polymarket, "tok");
        assert_eq!(long.pnl_at(dec!(0.50)), dec!(5.00));

        let short = PositionLeg {
            side: Side::Short,
            ..long
        };
        assert_eq!(short.pnl_at(dec!(0.50)), dec!(-5.00));
    }

    #[test]
    fn reference_price_ratchets() {
        let mut pos = Position::open(
            StrategyKind::Prediction,
            vec![leg(Venue::Polymarket, "tok")],
            thesis(dec!(0.10), dec!(0.45)),
            ExitPolicy::default(),
        );
        assert_eq!(pos.reference_price(), dec!(0.45));
        pos.last_check_price = Some(dec!(0.47));
        assert_eq!(pos.reference_price(), dec!(0.47));
    }

    #[test]
    fn funding_positions_watch_fills_too() {
        let pos = Position::open(
            StrategyKind::FundingArb,
            vec![leg(Venue::Hyperliquid, "BTC")],
            thesis(dec!(0.05), dec!(60000)),
            ExitPolicy::default(),
        );
        let subs = pos.subscriptions();
        assert!(subs.contains(&(StreamKind::Ticker, "BTC".into())));
        assert!(subs.contains(&(StreamKind::VenueFills, "BTC".into())));
    }

    #[test]
    fn prediction_position_subscribes_clob_only() {
        let pos = Position::open(
            StrategyKind::Prediction,
            vec![leg(Venue::Polymarket, "tok")],
            thesis(dec!(0.10), dec!(0.45)),
            ExitPolicy::default(),
        );
        assert_eq!(pos.subscriptions(), vec![(StreamKind::ClobBook, "tok".into())]);
    }
}
