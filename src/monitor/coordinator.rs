//! Watcher coordinator.
//!
//! Pure subscription plumbing: on every refresh pass it reads the instrument
//! keys active positions require, diffs them against what each watcher is
//! subscribed to, and issues subscribe/unsubscribe commands. Dead watcher
//! tasks are respawned with the full required set; watchers with no
//! dependents are torn down. The coordinator never evaluates a tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ReconnectionConfig;
use crate::domain::{InstrumentKey, PositionStatus, StreamKind, Tick};
use crate::notify::{Event, NotifierRegistry};
use crate::store::{PositionStore, StatusFilter};
use crate::stream::{ReconnectingTickStream, StreamFactory};

use super::watcher::{self, WatcherCommand, WatcherHandle};

pub struct WatcherCoordinator {
    store: Arc<PositionStore>,
    factories: Vec<Arc<dyn StreamFactory>>,
    reconnection: ReconnectionConfig,
    refresh_interval: Duration,
    ticks: mpsc::Sender<Tick>,
    notifiers: Arc<NotifierRegistry>,
    watchers: HashMap<StreamKind, WatcherHandle>,
    subscriptions: HashMap<StreamKind, HashSet<InstrumentKey>>,
    /// Feeds already reported as having no source, so the alert fires once.
    unsourced: HashSet<StreamKind>,
}

impl WatcherCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<PositionStore>,
        factories: Vec<Arc<dyn StreamFactory>>,
        reconnection: ReconnectionConfig,
        refresh_interval: Duration,
        ticks: mpsc::Sender<Tick>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        Self {
            store,
            factories,
            reconnection,
            refresh_interval,
            ticks,
            notifiers,
            watchers: HashMap::new(),
            subscriptions: HashMap::new(),
            unsourced: HashSet::new(),
        }
    }

    /// Run refresh passes forever.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.refresh_pass().await;
        }
    }

    /// One reconciliation of watchers and subscriptions against the store.
    pub async fn refresh_pass(&mut self) {
        let required = self.store.active_keys();
        let factories = self.factories.clone();

        // A position whose feed has no source would sit in `Open` forever;
        // that has to be visible, not inferred from silence.
        let sourced: HashSet<StreamKind> = factories.iter().map(|f| f.kind()).collect();
        for kind in required.keys() {
            if !sourced.contains(kind) && self.unsourced.insert(*kind) {
                warn!(stream = %kind, "Required feed has no stream source");
                self.notifiers.notify_all(Event::StreamDown {
                    kind: *kind,
                    reason: "no stream source configured for this feed".to_string(),
                });
            }
        }

        for factory in factories {
            let kind = factory.kind();
            let required_keys = required.get(&kind).cloned().unwrap_or_default();
            self.reconcile_kind(&*factory, kind, required_keys).await;
        }

        self.promote_open_positions();
    }

    async fn reconcile_kind(
        &mut self,
        factory: &dyn StreamFactory,
        kind: StreamKind,
        required: HashSet<InstrumentKey>,
    ) {
        // No dependents: tear the watcher down
        if required.is_empty() {
            if let Some(handle) = self.watchers.remove(&kind) {
                info!(stream = %kind, "No dependents left, tearing down watcher");
                handle.shutdown().await;
            }
            self.subscriptions.insert(kind, HashSet::new());
            return;
        }

        let alive = self.watchers.get(&kind).is_some_and(WatcherHandle::is_alive);
        if !alive {
            if self.watchers.remove(&kind).is_some() {
                warn!(stream = %kind, "Watcher task died, respawning");
            } else {
                info!(stream = %kind, keys = required.len(), "Spawning watcher");
            }
            let stream = Box::new(ReconnectingTickStream::new(
                factory.create(),
                self.reconnection.clone(),
            ));
            let handle = watcher::spawn(
                stream,
                kind,
                required.iter().cloned().collect(),
                self.ticks.clone(),
                self.notifiers.clone(),
            );
            self.watchers.insert(kind, handle);
            self.subscriptions.insert(kind, required);
            return;
        }

        let current = self.subscriptions.entry(kind).or_default().clone();
        let added: Vec<InstrumentKey> = required.difference(&current).cloned().collect();
        let removed: Vec<InstrumentKey> = current.difference(&required).cloned().collect();

        if added.is_empty() && removed.is_empty() {
            return;
        }
        debug!(
            stream = %kind,
            added = added.len(),
            removed = removed.len(),
            "Subscription diff"
        );

        let handle = self
            .watchers
            .get(&kind)
            .unwrap_or_else(|| unreachable!("watcher checked alive above"));
        if !added.is_empty() && !handle.send(WatcherCommand::Subscribe(added)).await {
            warn!(stream = %kind, "Watcher dropped subscribe command");
            return;
        }
        if !removed.is_empty() && !handle.send(WatcherCommand::Unsubscribe(removed)).await {
            warn!(stream = %kind, "Watcher dropped unsubscribe command");
            return;
        }
        self.subscriptions.insert(kind, required);
    }

    /// Positions whose streams are now covered move `Open -> Monitoring`.
    fn promote_open_positions(&self) {
        for position in self
            .store
            .list(StatusFilter::Status(PositionStatus::Open))
        {
            let covered = position.subscriptions().iter().all(|(kind, key)| {
                self.subscriptions
                    .get(kind)
                    .is_some_and(|keys| keys.contains(key))
            });
            if !covered {
                continue;
            }
            match self.store.transition(
                &position.id,
                PositionStatus::Open,
                PositionStatus::Monitoring,
            ) {
                Ok(_) => {
                    info!(position_id = %position.id, "Position under monitoring");
                }
                Err(e) if e.is_transition_conflict() => {}
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "Promotion failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StrategyKind;
    use crate::testkit::domain::{fast_reconnection, open_position};
    use crate::testkit::notify::RecordingNotifier;
    use crate::testkit::stream::ScriptedStreamFactory;
    use std::sync::atomic::Ordering;

    fn coordinator(
        store: Arc<PositionStore>,
        factory: Arc<ScriptedStreamFactory>,
    ) -> (WatcherCoordinator, mpsc::Receiver<Tick>) {
        let (tick_tx, tick_rx) = mpsc::channel(64);
        let coordinator = WatcherCoordinator::new(
            store,
            vec![factory],
            fast_reconnection(),
            Duration::from_millis(10),
            tick_tx,
            Arc::new(NotifierRegistry::new()),
        );
        (coordinator, tick_rx)
    }

    #[tokio::test]
    async fn spawns_watcher_and_promotes_open_position() {
        let store = Arc::new(PositionStore::in_memory());
        let id = store
            .create(open_position(StrategyKind::Prediction, "tok"))
            .unwrap();

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (mut coordinator, _rx) = coordinator(store.clone(), factory.clone());

        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(factory.spawn_count(), 1);
        assert!(factory
            .subscriptions()
            .contains(&InstrumentKey::new("tok")));
        assert_eq!(
            store.get(&id).unwrap().status,
            PositionStatus::Monitoring
        );
    }

    #[tokio::test]
    async fn diffs_subscriptions_on_later_passes() {
        let store = Arc::new(PositionStore::in_memory());
        store
            .create(open_position(StrategyKind::Prediction, "tok-a"))
            .unwrap();

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (mut coordinator, _rx) = coordinator(store.clone(), factory.clone());

        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // New position appears; its key must be added without a respawn
        store
            .create(open_position(StrategyKind::Prediction, "tok-b"))
            .unwrap();
        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(factory.spawn_count(), 1);
        let subs = factory.subscriptions();
        assert!(subs.contains(&InstrumentKey::new("tok-a")));
        assert!(subs.contains(&InstrumentKey::new("tok-b")));
    }

    #[tokio::test]
    async fn unsubscribes_keys_of_closed_positions() {
        let store = Arc::new(PositionStore::in_memory());
        let keep = store
            .create(open_position(StrategyKind::Prediction, "keep"))
            .unwrap();
        let close = store
            .create(open_position(StrategyKind::Prediction, "close"))
            .unwrap();

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (mut coordinator, _rx) = coordinator(store.clone(), factory.clone());
        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        store
            .transition(&close, PositionStatus::Monitoring, PositionStatus::Closing)
            .unwrap();
        store
            .transition(&close, PositionStatus::Closing, PositionStatus::Closed)
            .unwrap();

        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let subs = factory.subscriptions();
        assert!(subs.contains(&InstrumentKey::new("keep")));
        assert!(!subs.contains(&InstrumentKey::new("close")));
        assert_eq!(store.get(&keep).unwrap().status, PositionStatus::Monitoring);
    }

    #[tokio::test]
    async fn tears_down_watcher_when_last_dependent_leaves() {
        let store = Arc::new(PositionStore::in_memory());
        let id = store
            .create(open_position(StrategyKind::Prediction, "tok"))
            .unwrap();

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (mut coordinator, _rx) = coordinator(store.clone(), factory.clone());
        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(coordinator.watchers.len(), 1);

        store
            .transition(&id, PositionStatus::Monitoring, PositionStatus::Closing)
            .unwrap();
        store
            .transition(&id, PositionStatus::Closing, PositionStatus::Closed)
            .unwrap();

        coordinator.refresh_pass().await;
        assert!(coordinator.watchers.is_empty());
    }

    #[tokio::test]
    async fn alerts_once_when_a_required_feed_has_no_source() {
        let store = Arc::new(PositionStore::in_memory());
        // Hyperliquid legs need Ticker and VenueFills; only ClobBook is wired
        let id = store
            .create(open_position(StrategyKind::FundingArb, "BTC"))
            .unwrap();

        let events = RecordingNotifier::shared();
        let mut registry = NotifierRegistry::new();
        registry.register(Box::new(RecordingNotifier::new(events.clone())));

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (tick_tx, _rx) = mpsc::channel(8);
        let mut coordinator = WatcherCoordinator::new(
            store.clone(),
            vec![factory],
            fast_reconnection(),
            Duration::from_millis(10),
            tick_tx,
            Arc::new(registry),
        );

        coordinator.refresh_pass().await;
        coordinator.refresh_pass().await;

        let ticker_downs = events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::StreamDown {
                        kind: StreamKind::Ticker,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(ticker_downs, 1);
        let fills_downs = events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::StreamDown {
                        kind: StreamKind::VenueFills,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(fills_downs, 1);

        // The position cannot be promoted, but the gap is now visible
        assert_eq!(store.get(&id).unwrap().status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn respawns_dead_watcher_with_full_set() {
        let store = Arc::new(PositionStore::in_memory());
        store
            .create(open_position(StrategyKind::Prediction, "tok"))
            .unwrap();

        let factory = Arc::new(ScriptedStreamFactory::new(StreamKind::ClobBook));
        let (mut coordinator, _rx) = coordinator(store.clone(), factory.clone());
        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(factory.spawn_count(), 1);

        // Kill the watcher task
        if let Some(handle) = coordinator.watchers.remove(&StreamKind::ClobBook) {
            handle.shutdown().await;
        }
        // Simulate the dead-but-tracked state the next pass must detect
        let (tick_tx, _keep) = mpsc::channel(1);
        let dead = watcher::spawn(
            Box::new(factory.build_stream()),
            StreamKind::ClobBook,
            vec![],
            tick_tx,
            Arc::new(NotifierRegistry::new()),
        );
        dead_shutdown(&dead).await;
        coordinator.watchers.insert(StreamKind::ClobBook, dead);

        coordinator.refresh_pass().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(factory.spawn_count_raw().load(Ordering::SeqCst) >= 2);
        assert!(coordinator
            .watchers
            .get(&StreamKind::ClobBook)
            .is_some_and(WatcherHandle::is_alive));
    }

    async fn dead_shutdown(handle: &WatcherHandle) {
        let _ = handle.send(WatcherCommand::Shutdown).await;
        while handle.is_alive() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
