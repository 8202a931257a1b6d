//! Core domain types: identifiers, positions, opportunities, market ticks.
//!
//! Everything here is pure data. Money and ratios are `rust_decimal::Decimal`;
//! no floats cross a financial boundary.

mod ids;
mod opportunity;
mod position;
mod tick;

pub use ids::{InstrumentKey, PositionId, Venue};
pub use opportunity::{Opportunity, StrategyContext};
pub use position::{
    ExitPolicy, Position, PositionLeg, PositionStatus, Side, StrategyKind, ThesisSnapshot,
};
pub use tick::{StreamKind, Tick, TickPayload};
