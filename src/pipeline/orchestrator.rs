//! Pipeline Orchestrator
//!
//! Arena of per-sensor workers keyed by sensor id. Each worker owns its
//! `FeatureBuilder` and drains a bounded queue, so readings of one sensor are
//! serialized while different sensors run fully in parallel.
//!
//! Per reading:
//!
//! ```text
//! validate → out-of-order check → persist reading → derive features
//!          → (threshold check ∥ prediction) → alerts + prediction row → commit
//! ```
//!
//! A full queue yields `Backpressure` immediately. A persistence failure after
//! the reading row was written reverts the alerts this reading raised, removes
//! the row again and leaves the feature window untouched, so retrying the same
//! reading is meaningful.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::features::FeatureBuilder;
use super::thresholds::{ThresholdEvaluator, ThresholdViolation};
use super::validator::{self, Validation, ValidationError};
use crate::alerts::{AlertAction, AlertError, AlertManager, AlertUndo};
use crate::config::{ConfigError, SentinelConfig};
use crate::model::{ModelPrediction, ModelRegistry, PredictionOutcome, PredictiveModelAdapter};
use crate::storage::{RetryPolicy, StorageError, TelemetryStore};
use crate::types::{
    AlertType, FeatureVector, NewAlert, NewPrediction, RawReading, Reading, Sensor, SensorType,
};

// ============================================================================
// Results
// ============================================================================

/// Which write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStage {
    /// Duplicate lookup could not read the store
    Lookup,
    Reading,
    Alert,
    Prediction,
}

/// Everything one accepted reading produced.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub reading: Reading,
    pub features: FeatureVector,
    /// Value outside the sensor's configured range (stored and flagged)
    pub degraded: bool,
    pub threshold: Option<ThresholdViolation>,
    pub prediction: PredictionOutcome,
    pub alerts: Vec<AlertAction>,
}

/// Per-reading outcome. Never a panic, never fatal to the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessingResult {
    Processed(Box<ProcessingReport>),
    Rejected { error: ValidationError },
    /// Sensor queue full; the caller should retry or drop.
    Backpressure { sensor_id: String },
    /// Not durably processed; the caller should retry.
    PersistenceFailed {
        sensor_id: String,
        stage: PersistStage,
        error: String,
    },
    ShuttingDown,
}

impl ProcessingResult {
    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessingResult::Processed(_))
    }

    pub fn report(&self) -> Option<&ProcessingReport> {
        match self {
            ProcessingResult::Processed(r) => Some(r),
            _ => None,
        }
    }

    fn rejected(error: ValidationError) -> Self {
        ProcessingResult::Rejected { error }
    }
}

/// Result of a queued reading, resolved when its worker is done with it.
pub type PendingResult = BoxFuture<'static, ProcessingResult>;

// ============================================================================
// Health
// ============================================================================

/// Per-sensor worker state exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct SensorHealth {
    pub sensor_id: String,
    pub sensor_type: SensorType,
    pub processed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub backpressure: u64,
    pub consecutive_failures: u32,
    /// `consecutive_failures` reached the stall threshold
    pub stalled: bool,
    pub last_error: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_reading_ts: Option<DateTime<Utc>>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub accepting: bool,
    pub sensors: Vec<SensorHealth>,
    pub stalled_sensors: Vec<String>,
}

// ============================================================================
// Startup
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage error during startup: {0}")]
    Storage(#[from] StorageError),
    #[error("alert index rebuild failed: {0}")]
    Alerts(#[from] AlertError),
}

/// Read-only collaborators shared by every worker.
struct PipelineContext {
    store: Arc<dyn TelemetryStore>,
    thresholds: ThresholdEvaluator,
    adapter: PredictiveModelAdapter,
    alerts: Arc<AlertManager>,
    retry: RetryPolicy,
    forecast_alerts: bool,
    stall_threshold: u32,
}

struct Job {
    raw: RawReading,
    reply: oneshot::Sender<ProcessingResult>,
}

struct WorkerHandle {
    tx: mpsc::Sender<Job>,
    health: Arc<Mutex<SensorHealth>>,
}

pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    /// `None` once shutdown has begun
    workers: RwLock<Option<HashMap<String, WorkerHandle>>>,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Spawn one worker per registered sensor.
    ///
    /// Fails if a registered sensor's type has no threshold rules or model
    /// binding. Feature windows resume from the last stored readings and the
    /// Open-alert index is rebuilt from unacknowledged alerts.
    pub async fn start(
        store: Arc<dyn TelemetryStore>,
        models: Arc<ModelRegistry>,
        config: &SentinelConfig,
    ) -> Result<Self, StartupError> {
        let sensors = store.list_sensors()?;
        for sensor in &sensors {
            let missing = if config.thresholds.rules_for(sensor.sensor_type).is_empty() {
                Some("threshold rules")
            } else if !models.contains(sensor.sensor_type) {
                Some("model binding")
            } else {
                None
            };
            if let Some(what) = missing {
                return Err(ConfigError::MissingBinding {
                    sensor_id: sensor.id.clone(),
                    sensor_type: sensor.sensor_type,
                    what,
                }
                .into());
            }
        }

        let retry = RetryPolicy::from_config(&config.storage);
        let alerts = Arc::new(AlertManager::new(Arc::clone(&store), config.alerts.dedup, retry));
        alerts.rebuild().await?;

        let p = &config.pipeline;
        let ctx = Arc::new(PipelineContext {
            thresholds: ThresholdEvaluator::new(config.thresholds.clone()),
            adapter: PredictiveModelAdapter::new(
                models,
                p.inference_timeout(),
                config.alerts.anomaly_sigma_multiple,
                chrono::Duration::seconds(p.forecast_step_secs),
            ),
            alerts,
            retry,
            forecast_alerts: config.alerts.forecast_alerts,
            stall_threshold: p.stall_threshold,
            store,
        });

        let tracker = TaskTracker::new();
        let mut workers = HashMap::with_capacity(sensors.len());
        for sensor in sensors {
            let recent = ctx.store.recent_readings(&sensor.id, crate::config::defaults::FEATURE_WINDOW_SIZE)?;
            let builder = FeatureBuilder::warm_start(&sensor.id, &recent);
            let (tx, rx) = mpsc::channel(p.queue_depth);
            let health = Arc::new(Mutex::new(SensorHealth {
                sensor_id: sensor.id.clone(),
                sensor_type: sensor.sensor_type,
                processed: 0,
                rejected: 0,
                failed: 0,
                backpressure: 0,
                consecutive_failures: 0,
                stalled: false,
                last_error: None,
                last_processed_at: None,
                last_reading_ts: builder.last_ts(),
                queue_depth: 0,
                queue_capacity: p.queue_depth,
            }));

            debug!(sensor_id = %sensor.id, warm = recent.len(), "Sensor worker starting");
            let worker = SensorWorker {
                sensor: sensor.clone(),
                builder,
                ctx: Arc::clone(&ctx),
                health: Arc::clone(&health),
            };
            tracker.spawn(worker.run(rx));
            workers.insert(sensor.id, WorkerHandle { tx, health });
        }

        info!(sensors = workers.len(), queue_depth = p.queue_depth, "Pipeline orchestrator started");
        Ok(Self {
            ctx,
            workers: RwLock::new(Some(workers)),
            tracker,
        })
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.ctx.alerts
    }

    pub fn adapter(&self) -> &PredictiveModelAdapter {
        &self.ctx.adapter
    }

    pub fn store(&self) -> &Arc<dyn TelemetryStore> {
        &self.ctx.store
    }

    /// Enqueue a reading on its sensor's worker without waiting.
    ///
    /// `Err` carries an immediate outcome (malformed id, unknown sensor, full
    /// queue, shutdown); `Ok` resolves once the worker has processed it.
    pub fn submit(&self, raw: RawReading) -> Result<PendingResult, ProcessingResult> {
        let sensor_id = match validator::sensor_id(&raw) {
            Ok(id) => id.to_string(),
            Err(e) => {
                debug!(error = %e, "Reading rejected before routing");
                return Err(ProcessingResult::rejected(e));
            }
        };

        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        let Some(workers) = workers.as_ref() else {
            return Err(ProcessingResult::ShuttingDown);
        };
        let Some(handle) = workers.get(&sensor_id) else {
            debug!(sensor_id = %sensor_id, "Reading rejected: unknown sensor");
            return Err(ProcessingResult::rejected(ValidationError::UnknownSensor { sensor_id }));
        };

        let (reply, rx) = oneshot::channel();
        match handle.tx.try_send(Job { raw, reply }) {
            Ok(()) => Ok(async move { rx.await.unwrap_or(ProcessingResult::ShuttingDown) }.boxed()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                lock(&handle.health).backpressure += 1;
                debug!(sensor_id = %sensor_id, "Sensor queue full, backpressure");
                Err(ProcessingResult::Backpressure { sensor_id })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProcessingResult::ShuttingDown),
        }
    }

    /// Submit and wait for the outcome.
    pub async fn process(&self, raw: RawReading) -> ProcessingResult {
        match self.submit(raw) {
            Ok(pending) => pending.await,
            Err(immediate) => immediate,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let workers = self.workers.read().unwrap_or_else(|e| e.into_inner());
        let mut sensors: Vec<SensorHealth> = workers
            .iter()
            .flat_map(|w| w.values())
            .map(|h| {
                let mut health = lock(&h.health).clone();
                health.queue_depth = h.tx.max_capacity() - h.tx.capacity();
                health
            })
            .collect();
        sensors.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        let stalled_sensors = sensors.iter().filter(|s| s.stalled).map(|s| s.sensor_id.clone()).collect();
        PipelineStatus {
            accepting: workers.is_some(),
            sensors,
            stalled_sensors,
        }
    }

    /// Stop accepting readings, let every worker drain its queue, then return
    /// the sensors that were stalled once the queues ran dry.
    pub async fn shutdown(&self) -> Vec<String> {
        let workers = self.workers.write().unwrap_or_else(|e| e.into_inner()).take();
        let Some(workers) = workers else {
            return Vec::new();
        };
        let queued: usize = workers.values().map(|h| h.tx.max_capacity() - h.tx.capacity()).sum();
        info!(sensors = workers.len(), queued, "Orchestrator shutting down, draining queues");
        let health: Vec<Arc<Mutex<SensorHealth>>> = workers.values().map(|h| Arc::clone(&h.health)).collect();
        // dropping the senders ends each worker after its queue is empty
        drop(workers);
        self.tracker.close();
        self.tracker.wait().await;
        if let Err(e) = self.ctx.store.flush() {
            warn!(error = %e, "Store flush on shutdown failed");
        }
        info!("Orchestrator stopped");

        let mut stalled: Vec<String> = health
            .iter()
            .map(|h| lock(h))
            .filter(|h| h.stalled)
            .map(|h| h.sensor_id.clone())
            .collect();
        stalled.sort();
        stalled
    }
}

fn lock(health: &Mutex<SensorHealth>) -> std::sync::MutexGuard<'_, SensorHealth> {
    health.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Worker
// ============================================================================

struct SensorWorker {
    sensor: Sensor,
    builder: FeatureBuilder,
    ctx: Arc<PipelineContext>,
    health: Arc<Mutex<SensorHealth>>,
}

impl SensorWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            let result = self.handle(&job.raw).await;
            self.record(&result);
            // caller may have stopped waiting; the outcome is already durable
            let _ = job.reply.send(result);
        }
        debug!(sensor_id = %self.sensor.id, "Sensor worker drained");
    }

    fn record(&self, result: &ProcessingResult) {
        let mut h = lock(&self.health);
        match result {
            ProcessingResult::Processed(report) => {
                h.processed += 1;
                h.last_processed_at = Some(Utc::now());
                h.last_reading_ts = Some(report.reading.ts);
                if h.stalled {
                    info!(sensor_id = %self.sensor.id, after = h.consecutive_failures, "Sensor recovered");
                }
                h.consecutive_failures = 0;
                h.stalled = false;
            }
            ProcessingResult::Rejected { error } => {
                h.rejected += 1;
                debug!(sensor_id = %self.sensor.id, error = %error, "Reading rejected");
            }
            ProcessingResult::PersistenceFailed { error, stage, .. } => {
                h.failed += 1;
                h.consecutive_failures += 1;
                h.last_error = Some(format!("{stage:?}: {error}"));
                if !h.stalled && h.consecutive_failures >= self.ctx.stall_threshold {
                    h.stalled = true;
                    warn!(
                        sensor_id = %self.sensor.id,
                        consecutive_failures = h.consecutive_failures,
                        error = %error,
                        "Sensor stalled: persistence keeps failing"
                    );
                }
            }
            ProcessingResult::Backpressure { .. } | ProcessingResult::ShuttingDown => {}
        }
    }

    fn failed(&self, stage: PersistStage, error: impl std::fmt::Display) -> ProcessingResult {
        ProcessingResult::PersistenceFailed {
            sensor_id: self.sensor.id.clone(),
            stage,
            error: error.to_string(),
        }
    }

    async fn handle(&mut self, raw: &RawReading) -> ProcessingResult {
        let ctx = Arc::clone(&self.ctx);

        let accepted = match validator::validate(raw, &self.sensor, ctx.store.as_ref()) {
            Ok(Validation::Accepted(a)) => a,
            Ok(Validation::Rejected(e)) => return ProcessingResult::rejected(e),
            Err(e) => return self.failed(PersistStage::Lookup, e),
        };

        if let Some(latest) = self.builder.last_ts() {
            if accepted.ts < latest {
                return ProcessingResult::rejected(ValidationError::OutOfOrder {
                    sensor_id: accepted.sensor_id,
                    ts: accepted.ts,
                    latest,
                });
            }
        }

        if accepted.out_of_range {
            warn!(
                sensor_id = %self.sensor.id,
                value = accepted.value,
                min = self.sensor.min_value,
                max = self.sensor.max_value,
                "Degraded reading: value outside sensor range"
            );
        }

        let reading = match ctx.retry.run("insert_reading", || ctx.store.insert_reading(&accepted)).await {
            Ok(r) => r,
            Err(StorageError::Conflict(_)) => {
                return ProcessingResult::rejected(ValidationError::Duplicate {
                    sensor_id: accepted.sensor_id,
                    ts: accepted.ts,
                })
            }
            Err(e) => return self.failed(PersistStage::Reading, e),
        };

        let features = self.builder.derive(reading.ts, reading.value);
        let sensor_type = self.sensor.sensor_type;
        let (threshold, prediction) = tokio::join!(
            async { ctx.thresholds.evaluate(sensor_type, reading.value) },
            ctx.adapter.predict(sensor_type, &features),
        );

        let mut journal = Vec::new();
        match self.reconcile(&reading, threshold, &prediction, &mut journal).await {
            Ok(alerts) => {
                self.builder.advance(&features);
                ProcessingResult::Processed(Box::new(ProcessingReport {
                    degraded: reading.out_of_range,
                    reading,
                    features,
                    threshold,
                    prediction,
                    alerts,
                }))
            }
            Err((stage, e)) => {
                // leave no half-processed reading behind, alerts first
                for undo in journal.into_iter().rev() {
                    if let Err(ue) = ctx.alerts.undo(undo).await {
                        error!(
                            sensor_id = %reading.sensor_id,
                            error = %ue,
                            "Alert rollback failed; alert outlives its reading"
                        );
                    }
                }
                match ctx.store.remove_reading(&reading.sensor_id, reading.ts) {
                    Ok(_) => debug!(sensor_id = %reading.sensor_id, "Reading rolled back"),
                    Err(re) => error!(
                        sensor_id = %reading.sensor_id,
                        error = %re,
                        "Reading rollback failed; reading is stored without its alerts"
                    ),
                }
                self.failed(stage, e)
            }
        }
    }

    async fn raise(
        &self,
        trigger: NewAlert,
        journal: &mut Vec<AlertUndo>,
    ) -> Result<AlertAction, (PersistStage, AlertError)> {
        let (action, undo) = self
            .ctx
            .alerts
            .raise_undoable(trigger)
            .await
            .map_err(|e| (PersistStage::Alert, e))?;
        journal.push(undo);
        Ok(action)
    }

    /// Raise every triggered alert and persist the prediction. Every alert
    /// write lands in `journal` so a later failure can revert it.
    async fn reconcile(
        &self,
        reading: &Reading,
        threshold: Option<ThresholdViolation>,
        prediction: &PredictionOutcome,
        journal: &mut Vec<AlertUndo>,
    ) -> Result<Vec<AlertAction>, (PersistStage, AlertError)> {
        let mut actions = Vec::new();

        if let Some(v) = threshold {
            actions.push(
                self.raise(
                    NewAlert {
                        sensor_id: reading.sensor_id.clone(),
                        alert_type: AlertType::Threshold,
                        threshold_value: Some(v.threshold),
                        actual_value: v.actual,
                        message: v.describe(&reading.sensor_id),
                        severity: v.severity,
                    },
                    journal,
                )
                .await?,
            );
        }

        let PredictionOutcome::Predicted(p) = prediction else {
            if let PredictionOutcome::Skipped(reason) = prediction {
                debug!(sensor_id = %reading.sensor_id, %reason, "Threshold-only evaluation");
            }
            return Ok(actions);
        };

        if let Some(a) = &p.anomaly {
            actions.push(
                self.raise(
                    NewAlert {
                        sensor_id: reading.sensor_id.clone(),
                        alert_type: AlertType::Anomaly,
                        threshold_value: None,
                        actual_value: reading.value,
                        message: format!(
                            "{}: value {} deviates from predicted {:.3} by {:.2}σ (σ = {})",
                            reading.sensor_id, reading.value, p.predicted_value, a.normalized, a.sigma
                        ),
                        severity: a.severity,
                    },
                    journal,
                )
                .await?,
            );
        }

        if let Some(trigger) = self.forecast_breach(reading, p) {
            actions.push(self.raise(trigger, journal).await?);
        }

        self.ctx
            .alerts
            .record_prediction(NewPrediction {
                sensor_id: reading.sensor_id.clone(),
                predicted_value: p.predicted_value,
                confidence: p.confidence,
                model_version: p.model_version.clone(),
                reading_ts: Some(reading.ts),
            })
            .await
            .map_err(|e| (PersistStage::Prediction, e))?;

        Ok(actions)
    }

    /// Prediction alert when the one-step forecast crosses a threshold rule.
    fn forecast_breach(&self, reading: &Reading, p: &ModelPrediction) -> Option<NewAlert> {
        if !self.ctx.forecast_alerts {
            return None;
        }
        let next = p.next_value?;
        let v = self.ctx.thresholds.evaluate(self.sensor.sensor_type, next)?;
        Some(NewAlert {
            sensor_id: reading.sensor_id.clone(),
            alert_type: AlertType::Prediction,
            threshold_value: Some(v.threshold),
            actual_value: next,
            message: format!("{} (forecast, model {})", v.describe(&reading.sensor_id), p.model_version),
            severity: v.severity,
        })
    }
}
