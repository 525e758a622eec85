//! Threshold Evaluator
//!
//! Stateless check of a value against the injected per-type rule table.

use serde::Serialize;

use crate::config::{Direction, ThresholdTable};
use crate::types::{SensorType, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdViolation {
    pub severity: Severity,
    pub threshold: f64,
    pub actual: f64,
    pub direction: Direction,
}

impl ThresholdViolation {
    pub fn describe(&self, sensor_id: &str) -> String {
        let op = match self.direction {
            Direction::Above => "above",
            Direction::Below => "below",
        };
        format!(
            "{sensor_id}: value {} is {op} threshold {} ({})",
            self.actual, self.threshold, self.severity
        )
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    table: ThresholdTable,
}

impl ThresholdEvaluator {
    pub fn new(table: ThresholdTable) -> Self {
        Self { table }
    }

    /// Strict comparisons; when several rules match, the highest severity wins
    /// (first rule on ties).
    pub fn evaluate(&self, sensor_type: SensorType, value: f64) -> Option<ThresholdViolation> {
        let mut worst: Option<ThresholdViolation> = None;
        for rule in self.table.rules_for(sensor_type) {
            let hit = match rule.direction {
                Direction::Above => value > rule.value,
                Direction::Below => value < rule.value,
            };
            if hit && worst.map_or(true, |w| rule.severity > w.severity) {
                worst = Some(ThresholdViolation {
                    severity: rule.severity,
                    threshold: rule.value,
                    actual: value,
                    direction: rule.direction,
                });
            }
        }
        worst
    }
}
