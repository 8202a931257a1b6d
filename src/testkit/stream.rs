//! Stream doubles: scripted event sequences, channel-fed streams, and a
//! shared-state factory for coordinator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::domain::{InstrumentKey, StreamKind, Tick};
use crate::error::{Error, Result};
use crate::stream::{QuoteFetcher, StreamEvent, StreamFactory, TickStream};

/// Yields a fixed sequence of events, then pends forever. A scripted `None`
/// ends the stream for good. Connect results can be scripted the same way;
/// once the script runs out, connects succeed.
pub struct ScriptedTickStream {
    events: VecDeque<Option<StreamEvent>>,
    connect_results: VecDeque<Result<()>>,
    connects: Arc<AtomicU32>,
    subscribes: Arc<AtomicU32>,
}

impl ScriptedTickStream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            connect_results: VecDeque::new(),
            connects: Arc::new(AtomicU32::new(0)),
            subscribes: Arc::new(AtomicU32::new(0)),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Vec<Option<StreamEvent>>) -> Self {
        self.events = events.into();
        self
    }

    #[must_use]
    pub fn with_connect_results(mut self, results: Vec<Result<()>>) -> Self {
        self.connect_results = results.into();
        self
    }

    /// (connect count, subscribe count) handles.
    #[must_use]
    pub fn counts(&self) -> (Arc<AtomicU32>, Arc<AtomicU32>) {
        (self.connects.clone(), self.subscribes.clone())
    }
}

impl Default for ScriptedTickStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TickStream for ScriptedTickStream {
    async fn connect(&mut self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&mut self, _keys: &[InstrumentKey]) -> Result<()> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&mut self, _keys: &[InstrumentKey]) -> Result<()> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        match self.events.pop_front() {
            Some(event) => event,
            // Script exhausted: behave like a healthy, quiet stream
            None => std::future::pending().await,
        }
    }

    fn kind(&self) -> StreamKind {
        StreamKind::ClobBook
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// A stream fed by a channel, so a test can push events while a watcher task
/// owns the stream. Closing the handle exhausts the stream.
pub struct ChannelTickStream {
    kind: StreamKind,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    subscribed: Arc<Mutex<HashSet<InstrumentKey>>>,
}

/// Test-side handle to a [`ChannelTickStream`].
pub struct ChannelStreamHandle {
    events: mpsc::UnboundedSender<StreamEvent>,
    subscribed: Arc<Mutex<HashSet<InstrumentKey>>>,
}

impl ChannelTickStream {
    #[must_use]
    pub fn new(kind: StreamKind) -> (Self, ChannelStreamHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribed = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                kind,
                events: rx,
                subscribed: subscribed.clone(),
            },
            ChannelStreamHandle {
                events: tx,
                subscribed,
            },
        )
    }
}

impl ChannelStreamHandle {
    pub fn send_tick(&self, tick: Tick) {
        let _ = self.events.send(StreamEvent::Tick(tick));
    }

    pub fn send_event(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    /// End the stream: the next `next_event` returns `None`.
    pub fn close(self) {
        drop(self.events);
    }

    #[must_use]
    pub fn subscribed(&self) -> HashSet<InstrumentKey> {
        self.subscribed.lock().clone()
    }
}

#[async_trait]
impl TickStream for ChannelTickStream {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        self.subscribed.lock().extend(keys.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        let mut subscribed = self.subscribed.lock();
        for key in keys {
            subscribed.remove(key);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// Factory whose streams all share one subscription set, so a test can assert
/// on the final subscription state across respawns. Spawned streams never
/// yield events.
pub struct ScriptedStreamFactory {
    kind: StreamKind,
    spawned: Arc<AtomicU32>,
    subscribed: Arc<Mutex<HashSet<InstrumentKey>>>,
}

impl ScriptedStreamFactory {
    #[must_use]
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            spawned: Arc::new(AtomicU32::new(0)),
            subscribed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn spawn_count(&self) -> u32 {
        self.spawned.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn spawn_count_raw(&self) -> Arc<AtomicU32> {
        self.spawned.clone()
    }

    #[must_use]
    pub fn subscriptions(&self) -> HashSet<InstrumentKey> {
        self.subscribed.lock().clone()
    }

    /// Build an un-boxed stream sharing this factory's state.
    #[must_use]
    pub fn build_stream(&self) -> SilentTickStream {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        SilentTickStream {
            kind: self.kind,
            subscribed: self.subscribed.clone(),
        }
    }
}

impl StreamFactory for ScriptedStreamFactory {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn create(&self) -> Box<dyn TickStream> {
        Box::new(self.build_stream())
    }
}

/// A stream that tracks subscriptions but never produces an event.
pub struct SilentTickStream {
    kind: StreamKind,
    subscribed: Arc<Mutex<HashSet<InstrumentKey>>>,
}

#[async_trait]
impl TickStream for SilentTickStream {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        self.subscribed.lock().extend(keys.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        let mut subscribed = self.subscribed.lock();
        for key in keys {
            subscribed.remove(key);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        std::future::pending().await
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// Quote fetcher returning scripted prices. Keys without a scripted price
/// fail, like a venue 404.
pub struct ScriptedQuoteFetcher {
    quotes: Mutex<HashMap<InstrumentKey, Decimal>>,
}

impl ScriptedQuoteFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            quotes: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_quote(self, key: &str, price: Decimal) -> Self {
        self.quotes.lock().insert(key.into(), price);
        self
    }

    /// Change a scripted price mid-test.
    pub fn set_quote(&self, key: &str, price: Decimal) {
        self.quotes.lock().insert(key.into(), price);
    }
}

impl Default for ScriptedQuoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteFetcher for ScriptedQuoteFetcher {
    async fn fetch(&self, kind: StreamKind, key: &InstrumentKey) -> Result<Tick> {
        match self.quotes.lock().get(key) {
            Some(price) => Ok(Tick::quote(kind, key.clone(), *price, *price)),
            None => Err(Error::Connection(format!("no scripted quote for {key}"))),
        }
    }
}
