//! Market data stream ports.
//!
//! A `TickStream` is one upstream feed (websocket or otherwise) that yields
//! normalized [`Tick`]s for a set of subscribed instrument keys. Watchers own
//! a stream each; the coordinator talks to watchers, never to streams.

mod polymarket;
mod reconnecting;

pub use polymarket::{PolymarketQuoteFetcher, PolymarketStream, PolymarketStreamFactory};
pub use reconnecting::ReconnectingTickStream;

use async_trait::async_trait;

use crate::domain::{InstrumentKey, StreamKind, Tick};
use crate::error::Result;

/// Events produced by a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Tick(Tick),
    /// Connection established (or re-established).
    Connected,
    /// Connection lost. The reconnecting wrapper consumes these; a watcher
    /// only sees one when the wrapper has given up.
    Disconnected { reason: String },
}

/// One upstream market data feed.
#[async_trait]
pub trait TickStream: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Add keys to the subscription set.
    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()>;

    /// Remove keys from the subscription set.
    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()>;

    /// Next event, or `None` when the stream is exhausted for good.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    fn kind(&self) -> StreamKind;

    /// Human-readable source label for logging.
    fn source_name(&self) -> &'static str;
}

#[async_trait]
impl TickStream for Box<dyn TickStream> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        (**self).subscribe(keys).await
    }

    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        (**self).unsubscribe(keys).await
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        (**self).next_event().await
    }

    fn kind(&self) -> StreamKind {
        (**self).kind()
    }

    fn source_name(&self) -> &'static str {
        (**self).source_name()
    }
}

/// Builds fresh streams of one kind, so the coordinator can respawn a dead
/// watcher without holding venue details itself.
pub trait StreamFactory: Send + Sync {
    fn kind(&self) -> StreamKind;
    fn create(&self) -> Box<dyn TickStream>;
}

/// On-demand quote lookup for the fallback reconciler. REST-backed in
/// production, scripted in tests.
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    async fn fetch(&self, kind: StreamKind, key: &InstrumentKey) -> Result<Tick>;
}
