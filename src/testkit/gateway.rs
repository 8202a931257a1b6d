//! Recording execution gateway double.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use crate::domain::{PositionId, PositionLeg};
use crate::error::{ExecutionError, Result};
use crate::exec::{CloseReceipt, ExecutionGateway};

/// Gateway that settles every close with a fixed receipt, optionally failing
/// the first N calls. Idempotent per position id like the real thing, so
/// double-close tests can assert one settlement.
pub struct RecordingGateway {
    receipt: CloseReceipt,
    failures_left: AtomicU32,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
    settled: Mutex<HashMap<PositionId, CloseReceipt>>,
}

impl RecordingGateway {
    #[must_use]
    pub fn new() -> Self {
        Self {
            receipt: CloseReceipt {
                fill_price: dec!(0.50),
                realized_pnl: dec!(1.00),
            },
            failures_left: AtomicU32::new(0),
            delay: None,
            calls: Arc::new(AtomicU32::new(0)),
            settled: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_receipt(mut self, receipt: CloseReceipt) -> Self {
        self.receipt = receipt;
        self
    }

    /// Fail the first `n` submissions before settling.
    #[must_use]
    pub fn with_failures(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    /// Number of distinct positions settled.
    #[must_use]
    pub fn settled_count(&self) -> usize {
        self.settled.lock().len()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionGateway for RecordingGateway {
    async fn submit_close(&self, id: &PositionId, _legs: &[PositionLeg]) -> Result<CloseReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut settled = self.settled.lock();
        if let Some(receipt) = settled.get(id) {
            return Ok(receipt.clone());
        }

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExecutionError::SubmitFailed("scripted failure".to_string()).into());
        }

        settled.insert(id.clone(), self.receipt.clone());
        Ok(self.receipt.clone())
    }

    fn venue_name(&self) -> &'static str {
        "recording"
    }
}
