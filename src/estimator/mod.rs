//! Level-2 estimation port.
//!
//! Re-evaluating a thesis is slow and costs money, so it sits behind the
//! [`EstimationThrottle`](crate::monitor::EstimationThrottle) and runs under a
//! timeout. The estimator itself is a port: the shipped implementation asks
//! Claude for a superforecaster-style probability, tests script their own.

mod claude;

pub use claude::ClaudeEstimator;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{InstrumentKey, PositionId, StrategyKind};
use crate::error::{EstimationError, Result};

/// What the estimator gets to work with: the original thesis and where the
/// market has moved since.
#[derive(Debug, Clone)]
pub struct EstimateContext {
    pub position_id: PositionId,
    pub strategy: StrategyKind,
    pub instrument: InstrumentKey,
    pub question: String,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub thesis_probability: Option<Decimal>,
    pub thesis_rationale: String,
    /// What escalated this check (for the prompt and the logs).
    pub trigger: String,
}

/// A fresh probability/edge estimate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Estimate {
    pub probability: Decimal,
    pub edge: Decimal,
    pub rationale: String,
}

/// Level-2 thesis re-evaluation.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(&self, ctx: &EstimateContext) -> Result<Estimate>;

    fn name(&self) -> &'static str;
}

/// Estimator used when no API key is configured. Every call fails, which the
/// evaluator turns into an alert rather than an exit.
pub struct UnavailableEstimator;

#[async_trait]
impl Estimator for UnavailableEstimator {
    async fn estimate(&self, _ctx: &EstimateContext) -> Result<Estimate> {
        Err(EstimationError::Unavailable.into())
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
