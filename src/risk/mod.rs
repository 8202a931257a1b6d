//! Deterministic risk sizing.
//!
//! `RiskSizer` is pure: the same opportunity and the same exposure snapshot
//! always produce the same decision. Exposure is read from the store at call
//! time by the caller; nothing here caches.

use rust_decimal::Decimal;

use crate::config::{RiskConfig, StrategiesConfig};
use crate::domain::Opportunity;
use crate::error::RiskError;

/// Approved stake and the raw Kelly fraction it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SizePlan {
    pub stake: Decimal,
    /// Unscaled Kelly fraction, zero for threshold strategies.
    pub kelly_fraction: Decimal,
}

/// Outcome of sizing an opportunity.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeDecision {
    Approved(SizePlan),
    Rejected(RiskError),
}

impl SizeDecision {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, SizeDecision::Approved(_))
    }
}

pub struct RiskSizer {
    risk: RiskConfig,
    strategies: StrategiesConfig,
}

impl RiskSizer {
    #[must_use]
    pub fn new(risk: RiskConfig, strategies: StrategiesConfig) -> Self {
        Self { risk, strategies }
    }

    /// Size an opportunity against a point-in-time category exposure.
    ///
    /// Kelly stake for probability strategies: `f = (p*b - q) / b` with
    /// `b` the net odds at the quoted price, scaled by the fractional
    /// multiplier, floored at the minimum stake and capped per trade.
    /// Threshold strategies take the per-trade cap directly.
    #[must_use]
    pub fn size(&self, opportunity: &Opportunity, category_exposure: Decimal) -> SizeDecision {
        let policy = self.strategies.policy(opportunity.strategy);
        if opportunity.edge < policy.min_edge {
            return SizeDecision::Rejected(RiskError::EdgeBelowMinimum {
                edge: opportunity.edge,
                minimum: policy.min_edge,
            });
        }

        let (stake, kelly) = match opportunity.probability {
            Some(p) => match self.kelly_stake(p, opportunity.price) {
                Ok(pair) => pair,
                Err(e) => return SizeDecision::Rejected(e),
            },
            None => (self.risk.max_per_trade, Decimal::ZERO),
        };

        let cap = self.risk.category_cap * self.risk.bankroll;
        if category_exposure + stake > cap {
            return SizeDecision::Rejected(RiskError::CategoryExposureExceeded {
                current: category_exposure,
                additional: stake,
                cap,
            });
        }

        SizeDecision::Approved(SizePlan {
            stake,
            kelly_fraction: kelly,
        })
    }

    fn kelly_stake(
        &self,
        probability: Decimal,
        price: Decimal,
    ) -> Result<(Decimal, Decimal), RiskError> {
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(RiskError::NonPositiveKelly);
        }
        // Net odds: win (1 - price) per unit staked at `price`.
        let b = (Decimal::ONE - price) / price;
        let q = Decimal::ONE - probability;
        let kelly = (probability * b - q) / b;
        if kelly <= Decimal::ZERO {
            return Err(RiskError::NonPositiveKelly);
        }

        let raw = self.risk.bankroll * kelly * self.risk.kelly_fraction;
        let stake = raw.min(self.risk.max_per_trade).max(self.risk.min_stake);
        Ok((stake, kelly))
    }
}
