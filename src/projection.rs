//! Derivation of flat rule records from a configuration document.
//!
//! The dashboard consumes rows, not nested maps. A detection rule surfaces
//! the first window of a class's schedule; an alert rule copies the class's
//! alert settings verbatim. Both are recomputed from the document on every
//! call and never written back.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::{AlertChannels, ModelConfig, TimeWindow};
use crate::error::{Error, Result};

/// One schedule row. `enabled` means the class is currently tracked; it is
/// derived from `detector.tracked_class` membership at projection time, not
/// stored anywhere. Only the first schedule window is surfaced, additional
/// windows stay in the document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRule {
    pub object_type: String,
    pub start_time: String,
    pub end_time: String,
    pub enabled: bool,
}

/// One alert row, copied verbatim from the document. Unlike detection rules,
/// alerts carry their own stored `enabled` flag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertRule {
    #[serde(rename = "objectType")]
    pub object_type: String,
    pub channels: AlertChannels,
    pub confidence_min: f64,
    pub enabled: bool,
}

/// Everything the dashboard shows for one document.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Projection {
    pub rules: Vec<DetectionRule>,
    pub alerts: Vec<AlertRule>,
}

/// Derive the schedule row for one class. An empty window list violates the
/// document contract and fails this one rule.
pub fn detection_rule(
    config: &ModelConfig,
    class: &str,
    windows: &[TimeWindow],
) -> Result<DetectionRule> {
    let first = windows
        .first()
        .ok_or_else(|| Error::MalformedSchedule(class.to_string()))?;
    Ok(DetectionRule {
        object_type: class.to_string(),
        start_time: first.start.clone(),
        end_time: first.end.clone(),
        enabled: config.is_tracked(class),
    })
}

/// Project a whole document. Malformed schedule entries are logged and
/// skipped; the rest of the projection proceeds.
pub fn project(config: &ModelConfig) -> Projection {
    let mut rules = Vec::with_capacity(config.detection_schedule.len());
    for (class, windows) in &config.detection_schedule {
        match detection_rule(config, class, windows) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!(error = %e, "skipping malformed schedule entry"),
        }
    }

    let alerts = config
        .alert_configs
        .iter()
        .map(|(object_type, details)| AlertRule {
            object_type: object_type.clone(),
            channels: details.channels.clone(),
            confidence_min: details.confidence_min,
            enabled: details.enabled,
        })
        .collect();

    Projection { rules, alerts }
}
