//! End-to-end monitoring scenarios: tick in, lifecycle decision out.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use polywatch::config::StrategiesConfig;
use polywatch::domain::{ExitPolicy, PositionStatus, StrategyKind};
use polywatch::monitor::{EstimationThrottle, PositionEvaluator, PriceCache};
use polywatch::notify::{Event, NotifierRegistry};
use polywatch::store::PositionStore;
use polywatch::testkit::domain::{
    monitoring_position, monitoring_position_with_policy, quote_tick,
};
use polywatch::testkit::estimator::ScriptedEstimator;
use polywatch::testkit::gateway::RecordingGateway;
use polywatch::testkit::notify::RecordingNotifier;
use rust_decimal_macros::dec;

struct Fixture {
    store: Arc<PositionStore>,
    evaluator: Arc<PositionEvaluator>,
    gateway: Arc<RecordingGateway>,
    events: Arc<parking_lot::Mutex<Vec<Event>>>,
}

fn fixture(estimator: ScriptedEstimator, gateway: RecordingGateway) -> Fixture {
    let store = Arc::new(PositionStore::in_memory());
    let gateway = Arc::new(gateway);
    let prices = Arc::new(PriceCache::new());

    let events = RecordingNotifier::shared();
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(RecordingNotifier::new(events.clone())));

    let throttle = EstimationThrottle::new(
        store.clone(),
        Arc::new(estimator),
        StrategiesConfig::default(),
        Duration::from_millis(500),
    );
    let evaluator = Arc::new(PositionEvaluator::new(
        store.clone(),
        throttle,
        gateway.clone(),
        Arc::new(registry),
        StrategiesConfig::default(),
        prices,
        3,
        Duration::from_secs(1),
    ));

    Fixture {
        store,
        evaluator,
        gateway,
        events,
    }
}

fn stop_loss_policy() -> ExitPolicy {
    ExitPolicy {
        stop_loss_pct: Some(dec!(0.10)),
        ..ExitPolicy::default()
    }
}

#[tokio::test]
async fn racing_ticks_produce_exactly_one_estimation() {
    let estimator = ScriptedEstimator::new().with_delay(Duration::from_millis(100));
    let calls = estimator.calls();
    let fx = fixture(estimator, RecordingGateway::new());
    let position = monitoring_position(&fx.store, StrategyKind::Prediction, "tok");

    // Both ticks cross the estimated probability, both try to escalate
    let a = quote_tick("tok", dec!(0.60));
    let b = quote_tick("tok", dec!(0.61));
    tokio::join!(fx.evaluator.handle_tick(&a), fx.evaluator.handle_tick(&b));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Monitoring);
    assert!(fresh.last_evaluated_at.is_some());
}

#[tokio::test]
async fn thin_edge_estimate_closes_in_one_pass() {
    let estimator = ScriptedEstimator::new().with_default(polywatch::estimator::Estimate {
        probability: dec!(0.48),
        edge: dec!(0.005),
        rationale: "thesis no longer holds".to_string(),
    });
    let fx = fixture(estimator, RecordingGateway::new());
    let position = monitoring_position(&fx.store, StrategyKind::Prediction, "tok");

    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.60))).await;

    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Closed);
    assert!(fresh.realized_pnl.is_some());
    assert!(fresh
        .close_reason
        .as_deref()
        .is_some_and(|r| r.contains("below floor")));
    assert_eq!(fx.gateway.calls().load(Ordering::SeqCst), 1);
    assert!(fx
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::PositionClosed(_))));
}

#[tokio::test]
async fn cooldown_suppresses_back_to_back_estimations() {
    let estimator = ScriptedEstimator::new();
    let calls = estimator.calls();
    let fx = fixture(estimator, RecordingGateway::new());
    let position = monitoring_position(&fx.store, StrategyKind::Prediction, "tok");

    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.60))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Still crossing after the refreshed thesis, but inside the cooldown
    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.70))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        fx.store.get(&position.id).unwrap().status,
        PositionStatus::Monitoring
    );
}

#[tokio::test]
async fn concurrent_breach_ticks_settle_the_close_once() {
    let gateway = RecordingGateway::new().with_delay(Duration::from_millis(50));
    let fx = fixture(ScriptedEstimator::new(), gateway);
    let position = monitoring_position_with_policy(
        &fx.store,
        StrategyKind::Prediction,
        "tok",
        stop_loss_policy(),
    );

    // Entry 0.45 long; 0.40 is an -11% move, past the 10% stop
    let a = quote_tick("tok", dec!(0.40));
    let b = quote_tick("tok", dec!(0.39));
    tokio::join!(fx.evaluator.handle_tick(&a), fx.evaluator.handle_tick(&b));

    assert_eq!(fx.gateway.calls().load(Ordering::SeqCst), 1);
    assert_eq!(fx.gateway.settled_count(), 1);
    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Closed);

    let closes = fx
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, Event::PositionClosed(_)))
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn exhausted_close_retries_mark_position_failed() {
    let gateway = RecordingGateway::new().with_failures(3);
    let fx = fixture(ScriptedEstimator::new(), gateway);
    let position = monitoring_position_with_policy(
        &fx.store,
        StrategyKind::Prediction,
        "tok",
        stop_loss_policy(),
    );

    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.30))).await;

    assert_eq!(fx.gateway.calls().load(Ordering::SeqCst), 3);
    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Failed);
    assert!(fresh
        .close_reason
        .as_deref()
        .is_some_and(|r| r.contains("retries exhausted")));
    assert!(fx
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::PositionFailed(_))));
}

#[tokio::test]
async fn failed_estimation_alerts_and_holds() {
    let estimator = ScriptedEstimator::new().with_results(vec![Err(
        polywatch::error::EstimationError::Unavailable.into(),
    )]);
    let fx = fixture(estimator, RecordingGateway::new());
    let position = monitoring_position(&fx.store, StrategyKind::Prediction, "tok");

    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.60))).await;

    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Monitoring);
    // Failed estimation must not start the cooldown
    assert!(fresh.last_evaluated_at.is_none());
    assert!(fx
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, Event::Alert(_))));
    assert_eq!(fx.gateway.calls().load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn small_drift_only_ratchets_the_reference() {
    let estimator = ScriptedEstimator::new();
    let calls = estimator.calls();
    let fx = fixture(estimator, RecordingGateway::new());
    let position = monitoring_position(&fx.store, StrategyKind::Prediction, "tok");

    // 0.46 is ~2% off the 0.45 reference, under the 5% trigger
    fx.evaluator.handle_tick(&quote_tick("tok", dec!(0.46))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let fresh = fx.store.get(&position.id).unwrap();
    assert_eq!(fresh.status, PositionStatus::Monitoring);
    assert_eq!(fresh.last_check_price, Some(dec!(0.46)));
}
