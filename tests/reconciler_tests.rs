//! Fallback reconciler: direct quote sweeps when streams have gone quiet.

use std::sync::Arc;
use std::time::Duration;

use polywatch::config::StrategiesConfig;
use polywatch::domain::{ExitPolicy, PositionStatus, StrategyKind};
use polywatch::monitor::{
    EstimationThrottle, FallbackReconciler, PositionEvaluator, PriceCache,
};
use polywatch::notify::NotifierRegistry;
use polywatch::store::{JsonJournal, PositionStore};
use polywatch::testkit::domain::monitoring_position_with_policy;
use polywatch::testkit::estimator::ScriptedEstimator;
use polywatch::testkit::gateway::RecordingGateway;
use polywatch::testkit::stream::ScriptedQuoteFetcher;
use rust_decimal_macros::dec;

fn stop_loss_policy() -> ExitPolicy {
    ExitPolicy {
        stop_loss_pct: Some(dec!(0.10)),
        ..ExitPolicy::default()
    }
}

fn reconciler_with(
    store: Arc<PositionStore>,
    quotes: ScriptedQuoteFetcher,
) -> FallbackReconciler {
    let throttle = EstimationThrottle::new(
        store.clone(),
        Arc::new(ScriptedEstimator::new()),
        StrategiesConfig::default(),
        Duration::from_millis(500),
    );
    let evaluator = Arc::new(PositionEvaluator::new(
        store.clone(),
        throttle,
        Arc::new(RecordingGateway::new()),
        Arc::new(NotifierRegistry::new()),
        StrategiesConfig::default(),
        Arc::new(PriceCache::new()),
        3,
        Duration::from_secs(1),
    ));
    FallbackReconciler::new(store, evaluator, Arc::new(quotes), Duration::from_secs(60))
}

#[tokio::test]
async fn sweep_closes_a_breached_position_without_a_live_stream() {
    let store = Arc::new(PositionStore::in_memory());
    let position = monitoring_position_with_policy(
        &store,
        StrategyKind::Prediction,
        "tok",
        stop_loss_policy(),
    );

    // Entry 0.45 long; the market moved hard while the stream was down
    let quotes = ScriptedQuoteFetcher::new().with_quote("tok", dec!(0.30));
    let reconciler = reconciler_with(store.clone(), quotes);

    reconciler.sweep().await;

    assert_eq!(store.get(&position.id).unwrap().status, PositionStatus::Closed);
}

#[tokio::test]
async fn sweep_skips_keys_that_fail_to_fetch() {
    let store = Arc::new(PositionStore::in_memory());
    let covered = monitoring_position_with_policy(
        &store,
        StrategyKind::Prediction,
        "covered",
        stop_loss_policy(),
    );
    let orphan = monitoring_position_with_policy(
        &store,
        StrategyKind::Prediction,
        "orphan",
        stop_loss_policy(),
    );

    let quotes = ScriptedQuoteFetcher::new().with_quote("covered", dec!(0.30));
    let reconciler = reconciler_with(store.clone(), quotes);

    reconciler.sweep().await;

    assert_eq!(store.get(&covered.id).unwrap().status, PositionStatus::Closed);
    assert_eq!(
        store.get(&orphan.id).unwrap().status,
        PositionStatus::Monitoring
    );
}

#[tokio::test]
async fn restart_recovers_a_position_stranded_mid_estimation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.json");

    let id = {
        let store =
            Arc::new(PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap());
        let position = monitoring_position_with_policy(
            &store,
            StrategyKind::Prediction,
            "tok",
            stop_loss_policy(),
        );
        // Estimation claimed the position, then the process died
        store
            .transition(
                &position.id,
                PositionStatus::Monitoring,
                PositionStatus::Reevaluating,
            )
            .unwrap();
        position.id
    };

    let store = Arc::new(PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap());
    let interrupted = store.recover_interrupted().unwrap();
    assert!(interrupted.is_empty());
    assert_eq!(store.get(&id).unwrap().status, PositionStatus::Monitoring);

    // The stop-loss breach must now be actionable again
    let quotes = ScriptedQuoteFetcher::new().with_quote("tok", dec!(0.30));
    let reconciler = reconciler_with(store.clone(), quotes);
    reconciler.sweep().await;

    assert_eq!(store.get(&id).unwrap().status, PositionStatus::Closed);
}

#[tokio::test]
async fn restart_resurfaces_an_interrupted_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.json");

    let id = {
        let store =
            Arc::new(PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap());
        let position = monitoring_position_with_policy(
            &store,
            StrategyKind::Prediction,
            "tok",
            stop_loss_policy(),
        );
        store
            .transition(
                &position.id,
                PositionStatus::Monitoring,
                PositionStatus::Closing,
            )
            .unwrap();
        position.id
    };

    let store = Arc::new(PositionStore::open(Box::new(JsonJournal::new(&path))).unwrap());
    let interrupted = store.recover_interrupted().unwrap();

    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].id, id);
    assert_eq!(store.get(&id).unwrap().status, PositionStatus::Monitoring);

    // Breach still standing: the sweep re-drives the close to completion
    let quotes = ScriptedQuoteFetcher::new().with_quote("tok", dec!(0.30));
    let reconciler = reconciler_with(store.clone(), quotes);
    reconciler.sweep().await;

    assert_eq!(store.get(&id).unwrap().status, PositionStatus::Closed);
}

#[tokio::test]
async fn sweep_leaves_healthy_positions_monitoring() {
    let store = Arc::new(PositionStore::in_memory());
    let position = monitoring_position_with_policy(
        &store,
        StrategyKind::Prediction,
        "tok",
        stop_loss_policy(),
    );

    let quotes = ScriptedQuoteFetcher::new().with_quote("tok", dec!(0.46));
    let reconciler = reconciler_with(store.clone(), quotes);

    reconciler.sweep().await;

    let fresh = store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Monitoring);
    assert_eq!(fresh.last_check_price, Some(dec!(0.46)));
}
