//! Registry seeding from configuration.

use chrono::Utc;
use tracing::{debug, info};

use super::{StorageError, TelemetryStore};
use crate::config::AssetSeed;
use crate::types::{Asset, Sensor};

/// Upsert every configured asset and sensor.
///
/// Existing rows keep their `created_at`; only `updated_at` moves. Returns the
/// number of sensors in the registry afterwards.
pub fn seed_registry(store: &dyn TelemetryStore, seeds: &[AssetSeed]) -> Result<usize, StorageError> {
    let now = Utc::now();

    for seed in seeds {
        let created_at = store.get_asset(&seed.id)?.map_or(now, |a| a.created_at);
        store.upsert_asset(&Asset {
            id: seed.id.clone(),
            name: seed.name.clone(),
            location: seed.location.clone(),
            created_at,
            updated_at: now,
        })?;

        for s in &seed.sensors {
            let created_at = store.get_sensor(&s.id)?.map_or(now, |existing| existing.created_at);
            store.upsert_sensor(&Sensor {
                id: s.id.clone(),
                asset_id: seed.id.clone(),
                name: s.name.clone().unwrap_or_else(|| s.id.clone()),
                sensor_type: s.sensor_type,
                unit: s.unit.clone(),
                min_value: s.min_value,
                max_value: s.max_value,
                created_at,
                updated_at: now,
            })?;
            debug!(sensor_id = %s.id, sensor_type = %s.sensor_type, asset_id = %seed.id, "Sensor registered");
        }
    }

    let count = store.list_sensors()?.len();
    info!(assets = seeds.len(), sensors = count, backend = store.backend_name(), "Registry seeded");
    Ok(count)
}
