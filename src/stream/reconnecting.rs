//! Reconnecting wrapper for [`TickStream`].
//!
//! Consumers see an endless stream of ticks; drops, backoff, resubscription
//! and the circuit breaker all happen inside [`next_event`](TickStream::next_event).

use std::collections::HashSet;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ReconnectionConfig;
use crate::domain::{InstrumentKey, StreamKind};
use crate::error::Result;
use crate::stream::{StreamEvent, TickStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    /// Tripped; no connection attempts until the deadline passes.
    Open { until: Instant },
}

/// Wraps a [`TickStream`] with exponential-backoff reconnection.
///
/// Keys passed to `subscribe` are tracked so every reconnect restores the
/// full set. After `max_consecutive_failures` the circuit opens and attempts
/// pause for the configured cooldown.
pub struct ReconnectingTickStream<S: TickStream> {
    inner: S,
    config: ReconnectionConfig,
    /// Keys to restore after a reconnect.
    subscribed: HashSet<InstrumentKey>,
    consecutive_failures: u32,
    current_delay_ms: u64,
    circuit_state: CircuitState,
    connected: bool,
}

impl<S: TickStream> ReconnectingTickStream<S> {
    /// Starts disconnected; call [`connect`](TickStream::connect) before
    /// reading events.
    pub fn new(inner: S, config: ReconnectionConfig) -> Self {
        let initial_delay = config.initial_delay_ms;
        Self {
            inner,
            config,
            subscribed: HashSet::new(),
            consecutive_failures: 0,
            current_delay_ms: initial_delay,
            circuit_state: CircuitState::Closed,
            connected: false,
        }
    }

    fn reset_backoff(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay_ms = self.config.initial_delay_ms;
        self.circuit_state = CircuitState::Closed;
    }

    /// Count a failed attempt; trips the circuit at the threshold.
    fn note_failure(&mut self) {
        self.connected = false;
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.config.max_consecutive_failures
            && self.circuit_state == CircuitState::Closed
        {
            let cooldown = Duration::from_millis(self.config.circuit_breaker_cooldown_ms);
            self.circuit_state = CircuitState::Open {
                until: Instant::now() + cooldown,
            };
            warn!(
                source = self.inner.source_name(),
                failures = self.consecutive_failures,
                pause_ms = cooldown.as_millis() as u64,
                "too many consecutive failures, pausing reconnects"
            );
        }
    }

    /// Backoff delay for this attempt, with up to 20% jitter so a fleet of
    /// watchers does not storm back in lockstep. Advances the base delay.
    fn next_delay(&mut self) -> Duration {
        let base_ms = self.current_delay_ms;
        let jitter_span = base_ms / 5;
        let jitter = if jitter_span == 0 {
            0
        } else {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::from(d.subsec_nanos()))
                .unwrap_or(0);
            nanos % (jitter_span + 1)
        };

        self.current_delay_ms = ((base_ms as f64) * self.config.backoff_multiplier)
            .min(self.config.max_delay_ms as f64) as u64;
        Duration::from_millis(base_ms + jitter)
    }

    /// Sleep out an open circuit, then close it and start backoff fresh.
    async fn wait_out_circuit(&mut self) {
        if let CircuitState::Open { until } = self.circuit_state {
            let remaining = until.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                warn!(
                    source = self.inner.source_name(),
                    wait_ms = remaining.as_millis() as u64,
                    "circuit open, holding reconnects"
                );
                sleep(remaining).await;
            }
            self.circuit_state = CircuitState::Closed;
            self.reset_backoff();
        }
    }

    /// One reconnect attempt: cooldown, backoff, connect, resubscribe.
    async fn reconnect(&mut self) -> Result<()> {
        self.wait_out_circuit().await;

        let delay = self.next_delay();
        debug!(
            source = self.inner.source_name(),
            delay_ms = delay.as_millis() as u64,
            attempt = self.consecutive_failures + 1,
            "backing off before reconnect"
        );
        sleep(delay).await;

        if let Err(e) = self.inner.connect().await {
            warn!(source = self.inner.source_name(), error = %e, "reconnect attempt failed");
            self.note_failure();
            return Err(e);
        }
        self.connected = true;

        if !self.subscribed.is_empty() {
            let keys: Vec<InstrumentKey> = self.subscribed.iter().cloned().collect();
            if let Err(e) = self.inner.subscribe(&keys).await {
                warn!(
                    source = self.inner.source_name(),
                    error = %e,
                    keys = keys.len(),
                    "resubscribe failed, dropping the fresh connection"
                );
                self.note_failure();
                return Err(e);
            }
            debug!(keys = keys.len(), "restored subscriptions");
        }

        info!(source = self.inner.source_name(), "stream back up");
        self.reset_backoff();
        Ok(())
    }
}

#[async_trait]
impl<S: TickStream + Send> TickStream for ReconnectingTickStream<S> {
    async fn connect(&mut self) -> Result<()> {
        let result = self.inner.connect().await;
        if result.is_ok() {
            self.connected = true;
            self.reset_backoff();
        }
        result
    }

    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        // Track for restoration after a reconnect
        self.subscribed.extend(keys.iter().cloned());
        self.inner.subscribe(keys).await
    }

    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        for key in keys {
            self.subscribed.remove(key);
        }
        self.inner.unsubscribe(keys).await
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if !self.connected {
                if self.reconnect().await.is_err() {
                    continue;
                }
            }

            match self.inner.next_event().await {
                Some(StreamEvent::Disconnected { reason }) => {
                    warn!(source = self.inner.source_name(), reason = %reason, "connection lost");
                    self.note_failure();
                }
                None => {
                    warn!(source = self.inner.source_name(), "stream ended, treating as a drop");
                    self.note_failure();
                }
                Some(event) => {
                    if self.consecutive_failures > 0 {
                        self.reset_backoff();
                    }
                    return Some(event);
                }
            }
        }
    }

    fn kind(&self) -> StreamKind {
        self.inner.kind()
    }

    fn source_name(&self) -> &'static str {
        self.inner.source_name()
    }
}
