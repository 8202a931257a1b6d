//! Notification system for alerts and lifecycle events.
//!
//! The `Notifier` trait defines the interface for notification handlers.
//! Multiple notifiers can be registered with the `NotifierRegistry`.
//! Notifications are fire-and-forget; a slow sink never blocks evaluation.

#[cfg(feature = "telegram")]
mod telegram;

#[cfg(feature = "telegram")]
pub use telegram::{TelegramConfig, TelegramNotifier};

use rust_decimal::Decimal;

use crate::domain::{PositionId, StreamKind, StrategyKind};

/// Events that can trigger notifications.
#[derive(Debug, Clone)]
pub enum Event {
    /// Position needs eyes but holds: thin edge, failed estimation.
    Alert(PositionEvent),
    /// Position closed with realized pnl.
    PositionClosed(CloseEvent),
    /// Close attempts exhausted; manual intervention needed.
    PositionFailed(PositionEvent),
    /// A stream watcher gave up reconnecting.
    StreamDown { kind: StreamKind, reason: String },
}

/// Alert or failure details for one position.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub position_id: PositionId,
    pub strategy: StrategyKind,
    pub last_edge: Option<Decimal>,
    pub reason: String,
}

/// Close details for one position.
#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub position_id: PositionId,
    pub strategy: StrategyKind,
    pub reason: String,
    pub fill_price: Decimal,
    pub realized_pnl: Decimal,
}

/// Trait for notification handlers.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// Registry of notifiers.
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    /// Register a notifier.
    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Notify all registered notifiers.
    pub fn notify_all(&self, event: Event) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Check if registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A no-op notifier for testing or when notifications are disabled.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: Event) {
        // Do nothing
    }
}

/// A logging notifier that logs events via tracing.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        use tracing::{info, warn};
        match event {
            Event::Alert(e) => {
                warn!(
                    position_id = %e.position_id,
                    strategy = %e.strategy,
                    last_edge = ?e.last_edge,
                    reason = %e.reason,
                    "Position alert"
                );
            }
            Event::PositionClosed(e) => {
                info!(
                    position_id = %e.position_id,
                    strategy = %e.strategy,
                    reason = %e.reason,
                    fill_price = %e.fill_price,
                    pnl = %e.realized_pnl,
                    "Position closed"
                );
            }
            Event::PositionFailed(e) => {
                warn!(
                    position_id = %e.position_id,
                    strategy = %e.strategy,
                    reason = %e.reason,
                    "Position failed, manual intervention required"
                );
            }
            Event::StreamDown { kind, reason } => {
                warn!(stream = %kind, reason = %reason, "Stream down");
            }
        }
    }
}
