//! Config validation: unknown-key detection with Levenshtein suggestions
//! and threshold reachability checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::{Direction, SentinelConfig};
use crate::types::SensorType;

/// A non-fatal config warning (typo, unreachable threshold).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for SentinelConfig.
///
/// Array-of-table entries (`[[assets]]`, `[[thresholds.temperature]]`) share
/// the key path of their array. Must be kept in step with sentinel_config.rs.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys: Vec<String> = [
        // [storage]
        "storage",
        "storage.path",
        "storage.retry_attempts",
        "storage.retry_base_delay_ms",
        // [server]
        "server",
        "server.addr",
        // [pipeline]
        "pipeline",
        "pipeline.queue_depth",
        "pipeline.inference_timeout_ms",
        "pipeline.stall_threshold",
        "pipeline.forecast_step_secs",
        // [alerts]
        "alerts",
        "alerts.dedup",
        "alerts.anomaly_sigma_multiple",
        "alerts.forecast_alerts",
        // [[assets]]
        "assets",
        "assets.id",
        "assets.name",
        "assets.location",
        "assets.sensors",
        "assets.sensors.id",
        "assets.sensors.name",
        "assets.sensors.type",
        "assets.sensors.unit",
        "assets.sensors.min_value",
        "assets.sensors.max_value",
        // tables keyed by sensor type
        "thresholds",
        "models",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for t in SensorType::ALL {
        let ty = t.as_str();
        keys.push(format!("thresholds.{ty}"));
        for leaf in ["direction", "value", "severity"] {
            keys.push(format!("thresholds.{ty}.{leaf}"));
        }
        keys.push(format!("models.{ty}"));
        keys.push(format!("models.{ty}.artifact"));
        keys.push(format!("models.{ty}.inline"));
        for leaf in [
            "version",
            "intercept",
            "residual_sigma",
            "confidence_floor",
            "confidence_ceiling",
            "coefficients",
            "coefficients.lag1",
            "coefficients.lag2",
            "coefficients.roll3",
            "coefficients.hour",
        ] {
            keys.push(format!("models.{ty}.inline.{leaf}"));
        }
    }

    keys.into_iter().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`. Tables inside arrays are walked under the array's
/// own path, so `[[a]] b = 1` yields `["a", "a.b"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        keys.extend(walk_toml_keys(item, &path));
                    }
                }
                _ => {}
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Threshold Reachability
// ============================================================================

/// Warn about threshold rules that no seeded sensor of that type can ever
/// trigger because the limit lies outside every sensor's physical range.
pub fn validate_threshold_reach(config: &SentinelConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for sensor_type in SensorType::ALL {
        let ranges: Vec<(f64, f64)> = config
            .assets
            .iter()
            .flat_map(|a| a.sensors.iter())
            .filter(|s| s.sensor_type == sensor_type)
            .map(|s| (s.min_value, s.max_value))
            .collect();
        if ranges.is_empty() {
            continue;
        }

        for (i, rule) in config.thresholds.rules_for(sensor_type).iter().enumerate() {
            let reachable = ranges.iter().any(|&(min, max)| match rule.direction {
                Direction::Above => rule.value < max,
                Direction::Below => rule.value > min,
            });
            if !reachable {
                warnings.push(ValidationWarning {
                    field: format!("thresholds.{sensor_type}[{i}]"),
                    message: format!(
                        "thresholds.{sensor_type}[{i}] ({:?} {}) lies outside every {sensor_type} sensor range and can only fire on out-of-range readings",
                        rule.direction, rule.value
                    ),
                    suggestion: None,
                });
            }
        }
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("queue_depth", "queue_depth"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("queu_depth", "queue_depth"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [pipeline]
            queue_depth = 8
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"pipeline".to_string()));
        assert!(keys.contains(&"pipeline.queue_depth".to_string()));
    }

    #[test]
    fn test_walk_toml_keys_array_of_tables() {
        let toml: toml::Value = r#"
            [[assets]]
            id = "LINE_B"
            name = "Packaging"

            [[assets.sensors]]
            id = "S_TEMP_B"
            type = "temperature"
            unit = "°C"
            min_value = -10.0
            max_value = 60.0
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"assets.id".to_string()));
        assert!(keys.contains(&"assets.sensors.type".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[pipeline]
queu_depth = 8
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].field.contains("queu_depth"));
        assert_eq!(warnings[0].suggestion.as_deref(), Some("pipeline.queue_depth"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[pipeline]
queue_depth = 16
inference_timeout_ms = 100

[alerts]
dedup = "suppress_only"

[[thresholds.temperature]]
direction = "above"
value = 40.0
severity = "high"

[models.humidity]
artifact = "models/humidity.json"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_unknown_sensor_type_section_warns() {
        let toml_str = r#"
[[thresholds.pressure]]
direction = "above"
value = 5.0
severity = "low"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.iter().any(|w| w.field.contains("pressure")));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_unreachable_threshold_warns() {
        let mut config = SentinelConfig::default();
        config.thresholds.temperature[0].value = 120.0; // S_TEMP tops out at 80
        let warnings = validate_threshold_reach(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].field.starts_with("thresholds.temperature"));
    }

    #[test]
    fn test_default_thresholds_are_reachable() {
        let warnings = validate_threshold_reach(&SentinelConfig::default());
        assert!(warnings.is_empty(), "{warnings:?}");
    }
}
