//! Application wiring: build the monitoring stack from config and run it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::estimator::{ClaudeEstimator, Estimator, UnavailableEstimator};
use crate::exec::{ExecutionGateway, PaperGateway};
use crate::monitor::{
    EstimationThrottle, FallbackReconciler, PositionEvaluator, PriceCache, WatcherCoordinator,
};
use crate::notify::{Event, LogNotifier, NotifierRegistry, PositionEvent};
use crate::store::{PositionStore, StatusFilter};
use crate::stream::{PolymarketQuoteFetcher, PolymarketStreamFactory, StreamFactory};

#[cfg(feature = "telegram")]
use crate::notify::{TelegramConfig, TelegramNotifier};

/// Main application struct.
pub struct App;

impl App {
    /// Build every component and run the monitoring loop until the tick
    /// channel closes.
    pub async fn run(config: Config) -> Result<()> {
        let journal = crate::store::JsonJournal::new(&config.journal_path);
        let store = Arc::new(PositionStore::open(Box::new(journal))?);
        info!(
            path = %config.journal_path.display(),
            positions = store.list(StatusFilter::All).len(),
            active = store.list(StatusFilter::Active).len(),
            "Position journal loaded"
        );

        let notifiers = Arc::new(build_notifier_registry(&config));
        info!(notifiers = notifiers.len(), "Notifiers initialized");

        // A crash mid-estimation or mid-close leaves positions the CAS
        // guards would otherwise never touch again.
        let interrupted = store.recover_interrupted()?;
        for position in &interrupted {
            warn!(position_id = %position.id, "Close was in flight at shutdown, monitoring resumed");
            notifiers.notify_all(Event::Alert(PositionEvent {
                position_id: position.id.clone(),
                strategy: position.strategy,
                last_edge: Some(position.thesis.edge),
                reason: "close interrupted by restart; monitoring resumed".to_string(),
            }));
        }

        let estimator = build_estimator(&config);
        let prices = Arc::new(PriceCache::new());
        let gateway = build_gateway(&config, prices.clone());

        let throttle = EstimationThrottle::new(
            store.clone(),
            estimator,
            config.strategies.clone(),
            config.monitor.estimation_timeout(),
        );
        let evaluator = Arc::new(PositionEvaluator::new(
            store.clone(),
            throttle,
            gateway,
            notifiers.clone(),
            config.strategies.clone(),
            prices.clone(),
            config.monitor.close_retries,
            config.monitor.execution_timeout(),
        ));

        let (tick_tx, mut tick_rx) = mpsc::channel(1024);

        let factories: Vec<Arc<dyn StreamFactory>> = vec![Arc::new(PolymarketStreamFactory::new(
            config.network.ws_url.clone(),
        ))];
        let coordinator = WatcherCoordinator::new(
            store.clone(),
            factories,
            config.reconnection.clone(),
            Duration::from_secs(config.monitor.refresh_interval_secs),
            tick_tx,
            notifiers.clone(),
        );
        tokio::spawn(coordinator.run());

        let quotes = Arc::new(PolymarketQuoteFetcher::new(config.network.api_url.clone()));
        let reconciler = FallbackReconciler::new(
            store.clone(),
            evaluator.clone(),
            quotes,
            Duration::from_secs(config.monitor.sweep_interval_secs),
        );
        tokio::spawn(reconciler.run());

        info!("Monitoring loop running");
        while let Some(tick) = tick_rx.recv().await {
            evaluator.handle_tick(&tick).await;
        }

        // All watcher senders gone; the coordinator task holds one, so this
        // only happens on shutdown.
        info!("Tick channel closed, monitoring loop stopped");
        Ok(())
    }
}

/// Build notifier registry from configuration.
fn build_notifier_registry(config: &Config) -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();

    // Always add log notifier
    registry.register(Box::new(LogNotifier));

    #[cfg(feature = "telegram")]
    if config.telegram.enabled {
        if let Some(tg_config) = TelegramConfig::from_env() {
            let tg_config = TelegramConfig {
                notify_alerts: config.telegram.notify_alerts,
                notify_closes: config.telegram.notify_closes,
                ..tg_config
            };
            registry.register(Box::new(TelegramNotifier::new(tg_config)));
            info!("Telegram notifier enabled");
        } else {
            warn!("Telegram enabled but TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set");
        }
    }

    #[cfg(not(feature = "telegram"))]
    let _ = config;

    registry
}

/// Claude when a key is present, otherwise every Level-2 check fails into an
/// alert instead of an exit.
fn build_estimator(config: &Config) -> Arc<dyn Estimator> {
    match ClaudeEstimator::from_config(&config.estimator) {
        Ok(estimator) => {
            info!(model = %config.estimator.model, "Estimator initialized");
            Arc::new(estimator)
        }
        Err(e) => {
            warn!(error = %e, "No estimator available; re-evaluations will alert and hold");
            Arc::new(UnavailableEstimator)
        }
    }
}

fn build_gateway(config: &Config, prices: Arc<PriceCache>) -> Arc<dyn ExecutionGateway> {
    if !config.dry_run {
        warn!("Live execution gateway not configured; closes settle on paper");
    } else {
        info!("Dry-run mode, closes settle on paper");
    }
    Arc::new(PaperGateway::new(prices))
}
