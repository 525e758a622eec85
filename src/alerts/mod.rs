//! Alert Manager
//!
//! Per `(sensor, alert_type)` lifecycle: `NoAlert → Open → Acknowledged`.
//!
//! - At most one Open (unacknowledged) alert exists per key. A later violation
//!   either refreshes it (`DedupPolicy::UpdateOpen`) or is dropped
//!   (`DedupPolicy::SuppressOnly`).
//! - Acknowledgement is terminal for that occurrence; the next violation
//!   opens a new alert.
//! - Check-and-create is serialized per key by an async slot lock, so the
//!   invariant holds even without per-sensor worker serialization.
//!
//! Threshold, anomaly and prediction alerts are separate keys and never
//! suppress each other.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::DedupPolicy;
use crate::storage::{RetryPolicy, StorageError, TelemetryStore};
use crate::types::{Alert, AlertType, NewAlert, NewPrediction, Prediction};

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub sensor_id: String,
    pub alert_type: AlertType,
}

impl AlertKey {
    pub fn new(sensor_id: &str, alert_type: AlertType) -> Self {
        Self { sensor_id: sensor_id.to_string(), alert_type }
    }
}

/// What `raise` did with a trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "alert", rename_all = "snake_case")]
pub enum AlertAction {
    Opened(Alert),
    Updated(Alert),
    Suppressed(Alert),
}

impl AlertAction {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertAction::Opened(a) | AlertAction::Updated(a) | AlertAction::Suppressed(a) => a,
        }
    }
}

/// How to take back one `raise` when the reading behind it is rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertUndo {
    /// Remove the freshly opened alert and free its key.
    Remove(u64),
    /// Put back the row as it was before the update.
    Restore(Alert),
    /// Nothing was written.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "alert", rename_all = "snake_case")]
pub enum AcknowledgeOutcome {
    Acknowledged(Alert),
    AlreadyAcknowledged(Alert),
}

/// Id of the Open alert for one key, if any.
type Slot = Arc<tokio::sync::Mutex<Option<u64>>>;

pub struct AlertManager {
    store: Arc<dyn TelemetryStore>,
    policy: DedupPolicy,
    retry: RetryPolicy,
    slots: Mutex<HashMap<AlertKey, Slot>>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn TelemetryStore>, policy: DedupPolicy, retry: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            retry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &AlertKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Rebuild the Open index from stored unacknowledged alerts.
    ///
    /// Call once at startup before any reading is processed. Returns the number
    /// of keys with an Open alert.
    pub async fn rebuild(&self) -> Result<usize, AlertError> {
        let open = self.store.unacknowledged_alerts(None)?;
        let mut restored = 0;
        // newest first; the first alert seen for a key is the one kept Open
        for alert in open {
            let slot = self.slot(&AlertKey::new(&alert.sensor_id, alert.alert_type));
            let mut guard = slot.lock().await;
            if guard.is_none() {
                *guard = Some(alert.id);
                restored += 1;
            }
        }
        if restored > 0 {
            info!(open_alerts = restored, "Restored open alert index");
        }
        Ok(restored)
    }

    /// Reconcile one triggered condition with the Open state of its key.
    pub async fn raise(&self, trigger: NewAlert) -> Result<AlertAction, AlertError> {
        self.raise_undoable(trigger).await.map(|(action, _)| action)
    }

    /// `raise`, also returning how to revert it with [`AlertManager::undo`].
    pub async fn raise_undoable(&self, trigger: NewAlert) -> Result<(AlertAction, AlertUndo), AlertError> {
        let key = AlertKey::new(&trigger.sensor_id, trigger.alert_type);
        let slot = self.slot(&key);
        let mut open_id = slot.lock().await;

        if let Some(id) = *open_id {
            match self.store.get_alert(id)? {
                Some(existing) if existing.is_open() => return self.fold(existing, &trigger).await,
                // acknowledged or removed behind our back
                _ => *open_id = None,
            }
        }

        let alert = self
            .retry
            .run("insert_alert", || self.store.insert_alert(&trigger))
            .await?;
        *open_id = Some(alert.id);
        info!(
            alert_id = alert.id,
            sensor_id = %alert.sensor_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            actual = alert.actual_value,
            "Alert opened"
        );
        let undo = AlertUndo::Remove(alert.id);
        Ok((AlertAction::Opened(alert), undo))
    }

    async fn fold(&self, existing: Alert, trigger: &NewAlert) -> Result<(AlertAction, AlertUndo), AlertError> {
        match self.policy {
            DedupPolicy::SuppressOnly => {
                debug!(alert_id = existing.id, sensor_id = %existing.sensor_id, "Duplicate alert suppressed");
                Ok((AlertAction::Suppressed(existing), AlertUndo::Nothing))
            }
            DedupPolicy::UpdateOpen => {
                let previous = existing.clone();
                let mut updated = existing;
                updated.actual_value = trigger.actual_value;
                updated.message = trigger.message.clone();
                updated.threshold_value = trigger.threshold_value.or(updated.threshold_value);
                updated.severity = updated.severity.max(trigger.severity);
                updated.occurrences = updated.occurrences.saturating_add(1);
                updated.updated_at = Some(Utc::now());
                self.retry
                    .run("update_alert", || self.store.update_alert(&updated))
                    .await?;
                info!(
                    alert_id = updated.id,
                    sensor_id = %updated.sensor_id,
                    occurrences = updated.occurrences,
                    actual = updated.actual_value,
                    "Open alert updated"
                );
                Ok((AlertAction::Updated(updated), AlertUndo::Restore(previous)))
            }
        }
    }

    /// Revert one `raise_undoable` under its key's slot lock.
    pub async fn undo(&self, undo: AlertUndo) -> Result<(), AlertError> {
        match undo {
            AlertUndo::Nothing => Ok(()),
            AlertUndo::Remove(id) => {
                let Some(alert) = self.store.get_alert(id)? else {
                    return Ok(());
                };
                let slot = self.slot(&AlertKey::new(&alert.sensor_id, alert.alert_type));
                let mut open_id = slot.lock().await;
                self.store.remove_alert(id)?;
                if *open_id == Some(id) {
                    *open_id = None;
                }
                info!(alert_id = id, sensor_id = %alert.sensor_id, "Alert withdrawn");
                Ok(())
            }
            AlertUndo::Restore(previous) => {
                let slot = self.slot(&AlertKey::new(&previous.sensor_id, previous.alert_type));
                let _open_id = slot.lock().await;
                self.retry
                    .run("restore_alert", || self.store.update_alert(&previous))
                    .await?;
                info!(
                    alert_id = previous.id,
                    occurrences = previous.occurrences,
                    "Alert update reverted"
                );
                Ok(())
            }
        }
    }

    /// Operator acknowledgement. Idempotent; unknown ids are `NotFound`.
    pub async fn acknowledge(&self, id: u64) -> Result<AcknowledgeOutcome, AlertError> {
        let alert = self.store.get_alert(id)?.ok_or(AlertError::NotFound(id))?;
        let slot = self.slot(&AlertKey::new(&alert.sensor_id, alert.alert_type));
        let mut open_id = slot.lock().await;

        // re-read under the slot lock; a concurrent update may have landed
        let mut alert = self.store.get_alert(id)?.ok_or(AlertError::NotFound(id))?;
        if alert.acknowledged {
            return Ok(AcknowledgeOutcome::AlreadyAcknowledged(alert));
        }

        alert.acknowledged = true;
        alert.updated_at = Some(Utc::now());
        self.retry
            .run("acknowledge_alert", || self.store.update_alert(&alert))
            .await?;
        if *open_id == Some(id) {
            *open_id = None;
        }
        info!(alert_id = id, sensor_id = %alert.sensor_id, alert_type = %alert.alert_type, "Alert acknowledged");
        Ok(AcknowledgeOutcome::Acknowledged(alert))
    }

    /// Persist a model output (predictions share the alert persistence path).
    pub async fn record_prediction(&self, prediction: NewPrediction) -> Result<Prediction, AlertError> {
        Ok(self
            .retry
            .run("insert_prediction", || self.store.insert_prediction(&prediction))
            .await?)
    }

    pub fn open_alerts(&self, limit: Option<usize>) -> Result<Vec<Alert>, AlertError> {
        Ok(self.store.unacknowledged_alerts(limit)?)
    }
}
