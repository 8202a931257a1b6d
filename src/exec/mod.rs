//! Execution gateway port.
//!
//! Venue order mechanics live behind [`ExecutionGateway`]. The contract the
//! evaluator relies on: `submit_close` is idempotent per position id, so a
//! crash-retry or a double submission settles the position exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::domain::{PositionId, PositionLeg};
use crate::error::Result;
use crate::monitor::PriceCache;

/// Result of a settled close.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReceipt {
    pub fill_price: Decimal,
    pub realized_pnl: Decimal,
}

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Close out every leg of a position. Idempotent: a repeat call for the
    /// same position id returns the original receipt without trading again.
    async fn submit_close(&self, id: &PositionId, legs: &[PositionLeg]) -> Result<CloseReceipt>;

    fn venue_name(&self) -> &'static str;
}

/// Dry-run gateway: settles closes against the last cached price instead of
/// sending orders anywhere.
pub struct PaperGateway {
    prices: Arc<PriceCache>,
    settled: Mutex<HashMap<PositionId, CloseReceipt>>,
}

impl PaperGateway {
    #[must_use]
    pub fn new(prices: Arc<PriceCache>) -> Self {
        Self {
            prices,
            settled: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_close(&self, id: &PositionId, legs: &[PositionLeg]) -> Result<CloseReceipt> {
        let mut settled = self.settled.lock();
        if let Some(receipt) = settled.get(id) {
            info!(position_id = %id, "Close already settled, returning receipt");
            return Ok(receipt.clone());
        }

        let mut pnl = Decimal::ZERO;
        let mut fill_price = Decimal::ZERO;
        for (i, leg) in legs.iter().enumerate() {
            let price = self
                .prices
                .mid(&leg.instrument)
                .unwrap_or(leg.entry_price);
            pnl += leg.pnl_at(price);
            if i == 0 {
                fill_price = price;
            }
        }

        let receipt = CloseReceipt {
            fill_price,
            realized_pnl: pnl,
        };
        info!(
            position_id = %id,
            fill_price = %receipt.fill_price,
            pnl = %receipt.realized_pnl,
            "Paper close settled"
        );
        settled.insert(id.clone(), receipt.clone());
        Ok(receipt)
    }

    fn venue_name(&self) -> &'static str {
        "paper"
    }
}
