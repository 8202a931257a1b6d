//! Candidate opportunities handed in by upstream scanners.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{InstrumentKey, Venue};
use super::position::{Side, StrategyKind};

/// Strategy-specific context for an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyContext {
    Prediction {
        question: String,
        side: Side,
    },
    MicroArb {
        asset: String,
        move_pct: Decimal,
    },
    FundingArb {
        hourly_rate: Decimal,
    },
    Spread {
        buy_venue: Venue,
        sell_venue: Venue,
        sell_instrument: InstrumentKey,
    },
}

/// A sized-but-unsubmitted trading opportunity. Produced by scanners
/// outside this crate, consumed by the risk sizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub strategy: StrategyKind,
    pub venue: Venue,
    pub instrument: InstrumentKey,
    /// Expected edge as a fraction (0.09 = 9%).
    pub edge: Decimal,
    /// Estimated true probability, when the strategy has one.
    pub probability: Option<Decimal>,
    /// Quoted entry price.
    pub price: Decimal,
    pub context: StrategyContext,
    pub observed_at: DateTime<Utc>,
}

impl Opportunity {
    /// Exposure category for risk caps. Categories are strategy families.
    #[must_use]
    pub fn category(&self) -> StrategyKind {
        self.strategy
    }
}
