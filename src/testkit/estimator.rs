//! Scripted estimator double.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;

use crate::error::Result;
use crate::estimator::{Estimate, EstimateContext, Estimator};

/// Returns scripted results in order, falling back to a default estimate once
/// the script is exhausted. An optional delay simulates a slow model call.
pub struct ScriptedEstimator {
    default: Estimate,
    results: Mutex<VecDeque<Result<Estimate>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
}

impl ScriptedEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default: Estimate {
                probability: dec!(0.55),
                edge: dec!(0.10),
                rationale: "scripted".to_string(),
            },
            results: Mutex::new(VecDeque::new()),
            delay: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    #[must_use]
    pub fn with_default(mut self, estimate: Estimate) -> Self {
        self.default = estimate;
        self
    }

    #[must_use]
    pub fn with_results(self, results: Vec<Result<Estimate>>) -> Self {
        *self.results.lock() = results.into();
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
}

impl Default for ScriptedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Estimator for ScriptedEstimator {
    async fn estimate(&self, _ctx: &EstimateContext) -> Result<Estimate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.results.lock().pop_front() {
            Some(result) => result,
            None => Ok(self.default.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
