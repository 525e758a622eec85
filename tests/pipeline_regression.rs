//! Pipeline Regression Tests
//!
//! Drives the orchestrator end to end against the in-memory store (and sled
//! for the reference scenario): features, thresholds, predictions, alert
//! dedup and acknowledgement, ordering, backpressure, persistence failures
//! and shutdown draining.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use telemetry_sentinel::alerts::{AcknowledgeOutcome, AlertAction};
use telemetry_sentinel::config::{ConfigError, SentinelConfig};
use telemetry_sentinel::model::{
    ModelError, ModelInput, ModelOutput, ModelRegistry, PredictionOutcome, RegressionModel, SkipReason,
};
use telemetry_sentinel::pipeline::validator::ValidationError;
use telemetry_sentinel::pipeline::{Orchestrator, PersistStage, ProcessingReport, ProcessingResult, StartupError};
use telemetry_sentinel::storage::{seed_registry, InMemoryStore, Relation, SledStore, TelemetryStore};
use telemetry_sentinel::types::{AlertType, RawReading, SensorType, Severity};

// ============================================================================
// Helpers
// ============================================================================

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn reading(sensor_id: &str, minutes: i64, value: f64) -> RawReading {
    RawReading::new(sensor_id, t(minutes), value)
}

/// Default deployment with fast retries and the anomaly detector quiet enough
/// that only threshold alerts fire for the reference sequence.
fn test_config() -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.storage.retry_base_delay_ms = 1;
    config.alerts.anomaly_sigma_multiple = 3.0;
    config.alerts.forecast_alerts = false;
    config
}

async fn start_with(
    store: Arc<dyn TelemetryStore>,
    models: ModelRegistry,
    config: &SentinelConfig,
) -> Orchestrator {
    seed_registry(store.as_ref(), &config.assets).unwrap();
    Orchestrator::start(store, Arc::new(models), config).await.unwrap()
}

async fn start(store: &Arc<InMemoryStore>, config: &SentinelConfig) -> Orchestrator {
    let models = ModelRegistry::from_bindings(&config.models).unwrap();
    start_with(Arc::clone(store) as Arc<dyn TelemetryStore>, models, config).await
}

fn processed(result: ProcessingResult) -> ProcessingReport {
    match result {
        ProcessingResult::Processed(report) => *report,
        other => panic!("expected processed, got {other:?}"),
    }
}

fn opened(actions: &[AlertAction], alert_type: AlertType) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, AlertAction::Opened(alert) if alert.alert_type == alert_type))
        .count()
}

/// Echoes the rolling mean with an out-of-range confidence.
struct OverconfidentModel;

impl RegressionModel for OverconfidentModel {
    fn version(&self) -> &str {
        "overconfident-1"
    }

    fn residual_sigma(&self) -> f64 {
        100.0
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        Ok(ModelOutput { value: input.roll3, confidence: 1.5 })
    }
}

/// Blocks longer than any sane inference timeout.
struct SlowModel;

impl RegressionModel for SlowModel {
    fn version(&self) -> &str {
        "slow-1"
    }

    fn residual_sigma(&self) -> f64 {
        1.0
    }

    fn predict(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        std::thread::sleep(std::time::Duration::from_millis(300));
        Ok(ModelOutput { value: input.roll3, confidence: 0.9 })
    }
}

// ============================================================================
// Reference scenario
// ============================================================================

#[tokio::test]
async fn s_temp_reference_sequence_on_sled() {
    let config = test_config();
    let store: Arc<dyn TelemetryStore> = Arc::new(SledStore::temporary().unwrap());
    let models = ModelRegistry::from_bindings(&config.models).unwrap();
    let orch = start_with(Arc::clone(&store), models, &config).await;

    let first = processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    let second = processed(orch.process(reading("S_TEMP", 1, 31.0)).await);
    assert!(first.alerts.is_empty());
    assert!(second.alerts.is_empty());

    let third = processed(orch.process(reading("S_TEMP", 2, 36.0)).await);
    let f = &third.features;
    assert_eq!(f.lag1, Some(31.0));
    assert_eq!(f.lag2, Some(30.0));
    assert!((f.roll3 - 32.33).abs() < 0.01);

    let violation = third.threshold.expect("36.0 must violate > 35");
    assert_eq!(violation.severity, Severity::Critical);
    assert_eq!(violation.actual, 36.0);
    assert_eq!(violation.threshold, 35.0);

    assert_eq!(third.alerts.len(), 1);
    assert_eq!(opened(&third.alerts, AlertType::Threshold), 1);

    assert_eq!(store.recent_readings("S_TEMP", 10).unwrap().len(), 3);
    let open = store.unacknowledged_alerts(None).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].sensor_id, "S_TEMP");
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].actual_value, 36.0);
    assert_eq!(open[0].threshold_value, Some(35.0));

    // first two readings are cold start; the third is predicted and stored
    assert!(matches!(first.prediction, PredictionOutcome::Skipped(SkipReason::InsufficientHistory)));
    assert!(matches!(third.prediction, PredictionOutcome::Predicted(_)));
    assert_eq!(store.predictions_for_sensor("S_TEMP", None, None).unwrap().len(), 1);

    orch.shutdown().await;
}

#[tokio::test]
async fn cold_start_features_are_explicit() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let first = processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    assert_eq!(first.features.lag1, None);
    assert_eq!(first.features.lag2, None);
    assert_eq!(first.features.roll3, 30.0);

    let second = processed(orch.process(reading("S_TEMP", 1, 31.0)).await);
    assert_eq!(second.features.lag1, Some(30.0));
    assert_eq!(second.features.lag2, None);
    assert_eq!(second.features.roll3, 30.5);
}

// ============================================================================
// Thresholds and degraded readings
// ============================================================================

#[tokio::test]
async fn threshold_boundary_is_strict() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let at = processed(orch.process(reading("S_TEMP", 0, 35.0)).await);
    assert!(at.threshold.is_none());
    assert!(at.alerts.is_empty());

    let above = processed(orch.process(reading("S_TEMP", 1, 35.01)).await);
    assert_eq!(above.threshold.map(|v| v.severity), Some(Severity::Critical));
    assert_eq!(opened(&above.alerts, AlertType::Threshold), 1);
}

#[tokio::test]
async fn out_of_range_reading_is_stored_flagged_and_alerts() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    // S_TEMP range is -40..80
    let report = processed(orch.process(reading("S_TEMP", 0, 95.0)).await);
    assert!(report.degraded);
    assert!(report.reading.out_of_range);
    assert_eq!(opened(&report.alerts, AlertType::Threshold), 1);
    assert!(store.latest_reading("S_TEMP").unwrap().unwrap().out_of_range);
}

#[tokio::test]
async fn luminosity_below_threshold_is_low() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let report = processed(orch.process(reading("S_LIGHT", 0, 4.0)).await);
    let violation = report.threshold.unwrap();
    assert_eq!(violation.severity, Severity::Low);
    assert_eq!(violation.threshold, 10.0);
}

// ============================================================================
// Idempotence and dedup
// ============================================================================

#[tokio::test]
async fn reprocessing_identical_reading_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let raw = reading("S_TEMP", 0, 36.0);
    assert!(orch.process(raw.clone()).await.is_processed());
    match orch.process(raw).await {
        ProcessingResult::Rejected { error: ValidationError::Duplicate { sensor_id, .. } } => {
            assert_eq!(sensor_id, "S_TEMP");
        }
        other => panic!("expected duplicate, got {other:?}"),
    }

    assert_eq!(store.recent_readings("S_TEMP", 10).unwrap().len(), 1);
    assert_eq!(store.unacknowledged_alerts(None).unwrap().len(), 1);
}

#[tokio::test]
async fn consecutive_violations_update_the_open_alert() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    processed(orch.process(reading("S_TEMP", 0, 36.0)).await);
    let second = processed(orch.process(reading("S_TEMP", 1, 37.5)).await);
    assert!(matches!(second.alerts.as_slice(), [AlertAction::Updated(_)]));

    let open = store.unacknowledged_alerts(None).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].actual_value, 37.5);
    assert_eq!(open[0].occurrences, 2);
    assert!(open[0].message.contains("37.5"));
}

#[tokio::test]
async fn acknowledged_alert_is_not_reopened() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let first = processed(orch.process(reading("S_TEMP", 0, 36.0)).await);
    let first_id = first.alerts[0].alert().id;

    let ack = orch.alerts().acknowledge(first_id).await.unwrap();
    assert!(matches!(ack, AcknowledgeOutcome::Acknowledged(ref a) if a.acknowledged));
    assert!(store.unacknowledged_alerts(None).unwrap().is_empty());

    let again = processed(orch.process(reading("S_TEMP", 1, 36.5)).await);
    let new_alert = match again.alerts.as_slice() {
        [AlertAction::Opened(alert)] => alert.clone(),
        other => panic!("expected a new open alert, got {other:?}"),
    };
    assert_ne!(new_alert.id, first_id);
    assert!(store.get_alert(first_id).unwrap().unwrap().acknowledged);
    assert_eq!(store.unacknowledged_alerts(None).unwrap().len(), 1);

    // acknowledging twice is harmless
    let repeat = orch.alerts().acknowledge(first_id).await.unwrap();
    assert!(matches!(repeat, AcknowledgeOutcome::AlreadyAcknowledged(_)));
}

#[tokio::test]
async fn threshold_and_anomaly_alerts_are_independent() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = test_config();
    config.alerts.anomaly_sigma_multiple = 2.0;
    let orch = start(&store, &config).await;

    processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    processed(orch.process(reading("S_TEMP", 1, 31.0)).await);
    // predicted roll3 32.33, residual 3.67 = 2.44σ with σ 1.5
    let third = processed(orch.process(reading("S_TEMP", 2, 36.0)).await);

    assert_eq!(opened(&third.alerts, AlertType::Threshold), 1);
    assert_eq!(opened(&third.alerts, AlertType::Anomaly), 1);
    let anomaly = third
        .alerts
        .iter()
        .map(AlertAction::alert)
        .find(|a| a.alert_type == AlertType::Anomaly)
        .unwrap();
    assert_eq!(anomaly.severity, Severity::Medium);
    assert_eq!(anomaly.threshold_value, None);
}

#[tokio::test]
async fn forecast_breach_raises_prediction_alert() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = test_config();
    config.alerts.forecast_alerts = true;
    let orch = start(&store, &config).await;

    for (i, v) in [34.0, 36.0, 37.0].into_iter().enumerate() {
        processed(orch.process(reading("S_TEMP", i as i64, v)).await);
    }
    // window 36, 37, 38: roll3 37 > 35 for the next step too
    let report = processed(orch.process(reading("S_TEMP", 3, 38.0)).await);
    let PredictionOutcome::Predicted(p) = &report.prediction else {
        panic!("expected a prediction, got {:?}", report.prediction);
    };
    assert_eq!(p.next_value, Some(37.0));

    let alerts = store.alerts_for_sensor("S_TEMP", None).unwrap();
    assert!(alerts.iter().any(|a| a.alert_type == AlertType::Prediction));
    assert_eq!(alerts.iter().filter(|a| a.alert_type == AlertType::Prediction).count(), 1);
}

// ============================================================================
// Predictions
// ============================================================================

#[tokio::test]
async fn confidence_above_one_is_reported_as_defect() {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    let mut models = ModelRegistry::from_bindings(&config.models).unwrap();
    models.insert(SensorType::Temperature, Arc::new(OverconfidentModel));
    let orch = start_with(Arc::clone(&store) as Arc<dyn TelemetryStore>, models, &config).await;

    for (i, v) in [30.0, 31.0, 32.0].into_iter().enumerate() {
        let report = processed(orch.process(reading("S_TEMP", i as i64, v)).await);
        if i < 2 {
            continue;
        }
        let PredictionOutcome::Predicted(p) = report.prediction else {
            panic!("third reading must be predicted");
        };
        assert_eq!(p.confidence, 1.0);
        assert_eq!(p.confidence_defect, Some(1.5));
        assert_eq!(p.model_version, "overconfident-1");
    }

    let stored = store.predictions_for_sensor("S_TEMP", None, None).unwrap();
    assert_eq!(stored.len(), 1);
    assert!((0.0..=1.0).contains(&stored[0].confidence));
}

#[tokio::test]
async fn inference_timeout_falls_back_to_threshold_only() {
    let mut config = test_config();
    config.pipeline.inference_timeout_ms = 20;
    let store = Arc::new(InMemoryStore::new());
    let mut models = ModelRegistry::from_bindings(&config.models).unwrap();
    models.insert(SensorType::Temperature, Arc::new(SlowModel));
    let orch = start_with(Arc::clone(&store) as Arc<dyn TelemetryStore>, models, &config).await;

    processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    processed(orch.process(reading("S_TEMP", 1, 31.0)).await);
    let third = processed(orch.process(reading("S_TEMP", 2, 36.0)).await);

    assert!(matches!(third.prediction, PredictionOutcome::Skipped(SkipReason::Timeout)));
    assert_eq!(opened(&third.alerts, AlertType::Threshold), 1);
    assert!(store.predictions_for_sensor("S_TEMP", None, None).unwrap().is_empty());
}

// ============================================================================
// Ordering, isolation and backpressure
// ============================================================================

#[tokio::test]
async fn older_reading_is_rejected_out_of_order() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    processed(orch.process(reading("S_TEMP", 5, 30.0)).await);
    match orch.process(reading("S_TEMP", 3, 31.0)).await {
        ProcessingResult::Rejected { error: ValidationError::OutOfOrder { latest, .. } } => {
            assert_eq!(latest, t(5));
        }
        other => panic!("expected out-of-order, got {other:?}"),
    }
    assert_eq!(store.recent_readings("S_TEMP", 10).unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_and_unknown_readings_are_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let missing_value = RawReading {
        sensor_id: serde_json::json!("S_TEMP"),
        ts: serde_json::json!("2025-03-01T14:00:00Z"),
        value: serde_json::Value::Null,
    };
    assert!(matches!(
        orch.process(missing_value).await,
        ProcessingResult::Rejected { error: ValidationError::MissingField { field: "value" } }
    ));

    let bad_ts = RawReading {
        sensor_id: serde_json::json!("S_TEMP"),
        ts: serde_json::json!("yesterday"),
        value: serde_json::json!(30.0),
    };
    assert!(matches!(
        orch.process(bad_ts).await,
        ProcessingResult::Rejected { error: ValidationError::InvalidTimestamp { .. } }
    ));

    assert!(matches!(
        orch.process(reading("S_NOPE", 0, 1.0)).await,
        ProcessingResult::Rejected { error: ValidationError::UnknownSensor { .. } }
    ));
    assert!(store.recent_readings("S_TEMP", 10).unwrap().is_empty());
}

#[tokio::test]
async fn sensors_do_not_share_feature_state() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let mut pending = Vec::new();
    for i in 0..3 {
        pending.push(orch.submit(reading("S_TEMP", i, 30.0 + i as f64)).unwrap());
        pending.push(orch.submit(reading("S_HUMIDITY", i, 50.0 + i as f64)).unwrap());
    }
    let results = futures::future::join_all(pending).await;

    let humidity: Vec<_> = results
        .into_iter()
        .map(processed)
        .filter(|r| r.reading.sensor_id == "S_HUMIDITY")
        .collect();
    let last = &humidity[2].features;
    assert_eq!(last.lag1, Some(51.0));
    assert_eq!(last.lag2, Some(50.0));
    assert_eq!(last.roll3, 51.0);
}

#[tokio::test]
async fn full_queue_yields_backpressure_for_that_sensor_only() {
    let mut config = test_config();
    config.pipeline.queue_depth = 1;
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &config).await;

    // current-thread runtime: the worker cannot drain until we await
    let first = orch.submit(reading("S_TEMP", 0, 30.0)).unwrap();
    match orch.submit(reading("S_TEMP", 1, 31.0)) {
        Err(ProcessingResult::Backpressure { sensor_id }) => assert_eq!(sensor_id, "S_TEMP"),
        other => panic!("expected backpressure, got {:?}", other.err()),
    }
    let other_sensor = orch.submit(reading("S_HUMIDITY", 0, 50.0)).unwrap();

    assert!(first.await.is_processed());
    assert!(other_sensor.await.is_processed());

    let status = orch.status();
    let temp = status.sensors.iter().find(|s| s.sensor_id == "S_TEMP").unwrap();
    assert_eq!(temp.backpressure, 1);
    assert_eq!(temp.queue_capacity, 1);

    // the dropped reading can be retried
    assert!(orch.process(reading("S_TEMP", 1, 31.0)).await.is_processed());
}

// ============================================================================
// Persistence failures
// ============================================================================

#[tokio::test]
async fn failed_alert_write_rolls_back_reading() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    store.fail_next_writes(Relation::Alerts, 3);
    match orch.process(reading("S_TEMP", 0, 36.0)).await {
        ProcessingResult::PersistenceFailed { stage, sensor_id, .. } => {
            assert_eq!(stage, PersistStage::Alert);
            assert_eq!(sensor_id, "S_TEMP");
        }
        other => panic!("expected persistence failure, got {other:?}"),
    }
    assert!(!store.reading_exists("S_TEMP", t(0)).unwrap());

    // caller retry succeeds and the feature window never saw the failed attempt
    let retried = processed(orch.process(reading("S_TEMP", 0, 36.0)).await);
    assert_eq!(retried.features.lag1, None);
    assert_eq!(opened(&retried.alerts, AlertType::Threshold), 1);
    assert_eq!(store.unacknowledged_alerts(None).unwrap().len(), 1);
}

#[tokio::test]
async fn failed_prediction_write_withdraws_opened_alert() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    processed(orch.process(reading("S_TEMP", 1, 31.0)).await);

    store.fail_next_writes(Relation::Predictions, 3);
    match orch.process(reading("S_TEMP", 2, 36.0)).await {
        ProcessingResult::PersistenceFailed { stage, .. } => assert_eq!(stage, PersistStage::Prediction),
        other => panic!("expected persistence failure, got {other:?}"),
    }
    assert!(!store.reading_exists("S_TEMP", t(2)).unwrap());
    assert!(store.unacknowledged_alerts(None).unwrap().is_empty());
    assert!(store.alerts_for_sensor("S_TEMP", None).unwrap().is_empty());

    // the retry is the first occurrence, not the second
    let retried = processed(orch.process(reading("S_TEMP", 2, 36.0)).await);
    assert_eq!(opened(&retried.alerts, AlertType::Threshold), 1);
    let open = store.unacknowledged_alerts(None).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].occurrences, 1);
}

#[tokio::test]
async fn failed_prediction_write_restores_updated_alert() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    processed(orch.process(reading("S_TEMP", 0, 36.0)).await);
    processed(orch.process(reading("S_TEMP", 1, 37.0)).await);

    store.fail_next_writes(Relation::Predictions, 3);
    assert!(matches!(
        orch.process(reading("S_TEMP", 2, 38.0)).await,
        ProcessingResult::PersistenceFailed { stage: PersistStage::Prediction, .. }
    ));
    let open = store.unacknowledged_alerts(None).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].occurrences, 2);
    assert_eq!(open[0].actual_value, 37.0);

    let retried = processed(orch.process(reading("S_TEMP", 2, 38.0)).await);
    assert!(matches!(retried.alerts.as_slice(), [AlertAction::Updated(a)] if a.occurrences == 3));
    assert_eq!(store.unacknowledged_alerts(None).unwrap()[0].actual_value, 38.0);
}

#[tokio::test]
async fn transient_failure_within_retry_budget_is_invisible() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    store.fail_next_writes(Relation::Readings, 2);
    assert!(orch.process(reading("S_TEMP", 0, 30.0)).await.is_processed());
    assert!(store.reading_exists("S_TEMP", t(0)).unwrap());
}

#[tokio::test]
async fn repeated_failures_mark_sensor_stalled_then_recover() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();
    let orch = start(&store, &config).await;

    // three readings, each exhausting three attempts
    store.fail_next_writes(Relation::Readings, 9);
    for i in 0..3 {
        assert!(matches!(
            orch.process(reading("S_TEMP", i, 30.0)).await,
            ProcessingResult::PersistenceFailed { stage: PersistStage::Reading, .. }
        ));
    }

    let status = orch.status();
    assert_eq!(status.stalled_sensors, vec!["S_TEMP".to_string()]);
    let temp = status.sensors.iter().find(|s| s.sensor_id == "S_TEMP").unwrap();
    assert_eq!(temp.consecutive_failures, 3);
    assert!(temp.last_error.is_some());

    // other sensors keep flowing
    assert!(orch.process(reading("S_HUMIDITY", 0, 50.0)).await.is_processed());

    assert!(orch.process(reading("S_TEMP", 3, 30.0)).await.is_processed());
    let status = orch.status();
    assert!(status.stalled_sensors.is_empty());
}

#[tokio::test]
async fn shutdown_reports_sensors_still_stalled() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    store.fail_next_writes(Relation::Readings, 9);
    for i in 0..3 {
        orch.process(reading("S_VIBRATION", i, 100.0)).await;
    }
    assert!(orch.process(reading("S_TEMP", 0, 30.0)).await.is_processed());

    assert_eq!(orch.shutdown().await, vec!["S_VIBRATION".to_string()]);
    // a second shutdown has nothing left to report
    assert!(orch.shutdown().await.is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn shutdown_drains_queued_readings() {
    let store = Arc::new(InMemoryStore::new());
    let orch = start(&store, &test_config()).await;

    let pending: Vec<_> = (0..5)
        .map(|i| orch.submit(reading("S_TEMP", i, 30.0)).unwrap())
        .collect();
    orch.shutdown().await;

    for result in futures::future::join_all(pending).await {
        assert!(result.is_processed());
    }
    assert_eq!(store.recent_readings("S_TEMP", 10).unwrap().len(), 5);

    assert!(matches!(
        orch.process(reading("S_TEMP", 9, 30.0)).await,
        ProcessingResult::ShuttingDown
    ));
    assert!(!orch.status().accepting);
}

#[tokio::test]
async fn restart_resumes_feature_window_and_open_alerts() {
    let store = Arc::new(InMemoryStore::new());
    let config = test_config();

    let orch = start(&store, &config).await;
    processed(orch.process(reading("S_TEMP", 0, 30.0)).await);
    processed(orch.process(reading("S_TEMP", 1, 36.0)).await);
    orch.shutdown().await;
    drop(orch);

    let orch = start(&store, &config).await;
    let report = processed(orch.process(reading("S_TEMP", 2, 37.0)).await);
    assert_eq!(report.features.lag1, Some(36.0));
    assert_eq!(report.features.lag2, Some(30.0));
    assert!(matches!(report.alerts.as_slice(), [AlertAction::Updated(_)]));

    // ordering survives the restart too
    assert!(matches!(
        orch.process(reading("S_TEMP", 1, 31.0)).await,
        ProcessingResult::Rejected { .. }
    ));
}

#[tokio::test]
async fn unbound_sensor_type_is_fatal_at_startup() {
    let mut config = test_config();
    config.thresholds.humidity.clear();
    let store: Arc<dyn TelemetryStore> = Arc::new(InMemoryStore::new());
    seed_registry(store.as_ref(), &config.assets).unwrap();
    let models = Arc::new(ModelRegistry::from_bindings(&config.models).unwrap());

    match Orchestrator::start(Arc::clone(&store), models, &config).await {
        Err(StartupError::Config(ConfigError::MissingBinding { sensor_id, what, .. })) => {
            assert_eq!(sensor_id, "S_HUMIDITY");
            assert_eq!(what, "threshold rules");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("startup must fail"),
    }

    let config = test_config();
    match Orchestrator::start(store, Arc::new(ModelRegistry::new()), &config).await {
        Err(StartupError::Config(ConfigError::MissingBinding { what, .. })) => {
            assert_eq!(what, "model binding");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("startup must fail"),
    }
}
