//! Fixture builders for domain objects.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::config::{ReconnectionConfig, StrategiesConfig};
use crate::domain::{
    ExitPolicy, Position, PositionLeg, PositionStatus, Side, StrategyKind, StreamKind, Tick,
    ThesisSnapshot, Venue,
};
use crate::store::PositionStore;
use crate::stream::StreamEvent;

pub fn thesis(
    probability: Option<Decimal>,
    edge: Decimal,
    reference_price: Decimal,
) -> ThesisSnapshot {
    ThesisSnapshot {
        probability,
        edge,
        rationale: "scripted thesis".to_string(),
        reference_price,
        taken_at: Utc::now(),
    }
}

fn legs_for(kind: StrategyKind, instrument: &str) -> Vec<PositionLeg> {
    match kind {
        StrategyKind::Prediction | StrategyKind::MicroArb => vec![PositionLeg {
            venue: Venue::Polymarket,
            instrument: instrument.into(),
            side: Side::Long,
            entry_price: dec!(0.45),
            size: dec!(22.22),
        }],
        StrategyKind::FundingArb => vec![PositionLeg {
            venue: Venue::Hyperliquid,
            instrument: instrument.into(),
            side: Side::Short,
            entry_price: dec!(100),
            size: dec!(1),
        }],
        StrategyKind::Spread => vec![
            PositionLeg {
                venue: Venue::Binance,
                instrument: instrument.into(),
                side: Side::Long,
                entry_price: dec!(100),
                size: dec!(1),
            },
            PositionLeg {
                venue: Venue::Hyperliquid,
                instrument: format!("{instrument}-alt").as_str().into(),
                side: Side::Short,
                entry_price: dec!(100.5),
                size: dec!(1),
            },
        ],
    }
}

/// A freshly opened position with the strategy's default exit policy.
pub fn open_position(kind: StrategyKind, instrument: &str) -> Position {
    let policy = StrategiesConfig::default().policy(kind).exit_policy();
    position_with_policy(kind, instrument, policy)
}

/// A freshly opened position with an explicit exit policy.
pub fn position_with_policy(
    kind: StrategyKind,
    instrument: &str,
    exit_policy: ExitPolicy,
) -> Position {
    let probability = kind.uses_estimator().then(|| dec!(0.55));
    let reference = legs_for(kind, instrument)[0].entry_price;
    Position::open(kind, legs_for(kind, instrument), thesis(probability, dec!(0.10), reference), exit_policy)
        .with_description(format!("test market {instrument}"))
}

/// Create a position in the store and promote it to `Monitoring`.
pub fn monitoring_position(
    store: &Arc<PositionStore>,
    kind: StrategyKind,
    instrument: &str,
) -> Position {
    let id = store
        .create(open_position(kind, instrument))
        .expect("create position");
    store
        .transition(&id, PositionStatus::Open, PositionStatus::Monitoring)
        .expect("promote position")
}

/// Same, but with an explicit exit policy.
pub fn monitoring_position_with_policy(
    store: &Arc<PositionStore>,
    kind: StrategyKind,
    instrument: &str,
    exit_policy: ExitPolicy,
) -> Position {
    let id = store
        .create(position_with_policy(kind, instrument, exit_policy))
        .expect("create position");
    store
        .transition(&id, PositionStatus::Open, PositionStatus::Monitoring)
        .expect("promote position")
}

/// A quote tick with bid == ask == price on the CLOB feed.
pub fn quote_event(key: &str, price: Decimal) -> StreamEvent {
    StreamEvent::Tick(Tick::quote(StreamKind::ClobBook, key.into(), price, price))
}

/// A quote tick wrapped in nothing, for pushing straight at an evaluator.
pub fn quote_tick(key: &str, price: Decimal) -> Tick {
    Tick::quote(StreamKind::ClobBook, key.into(), price, price)
}

/// Reconnection config with millisecond delays so tests stay fast.
pub fn fast_reconnection() -> ReconnectionConfig {
    ReconnectionConfig {
        initial_delay_ms: 1,
        max_delay_ms: 10,
        backoff_multiplier: 2.0,
        max_consecutive_failures: 3,
        circuit_breaker_cooldown_ms: 10,
    }
}
