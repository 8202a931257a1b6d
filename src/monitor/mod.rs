//! Continuous position monitoring.
//!
//! The moving parts, wired together by the app layer:
//! - watchers pump normalized ticks from the streams
//! - the coordinator keeps watcher subscriptions matching the store
//! - the evaluator decides hold/alert/re-evaluate/close per tick
//! - the throttle gates the expensive Level-2 estimator
//! - the reconciler sweeps with direct quote fetches when streams go quiet

mod coordinator;
mod evaluator;
mod prices;
mod reconciler;
mod throttle;
mod watcher;

pub use coordinator::WatcherCoordinator;
pub use evaluator::PositionEvaluator;
pub use prices::{LastQuote, PriceCache};
pub use reconciler::FallbackReconciler;
pub use throttle::{DeferReason, EstimationThrottle, ThrottleOutcome};
pub use watcher::{spawn as spawn_watcher, WatcherCommand, WatcherHandle};
