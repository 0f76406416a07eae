//! Model configuration documents and their YAML codec.
//!
//! One document describes one deployable model: identity and active flag,
//! detector class lists, weight location, per-class detection schedules and
//! per-class alert channel settings. Documents are mirrored from the remote
//! authority as-is; the engine never edits them field by field, it only
//! replaces whole files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A model configuration document as cached on disk.
///
/// `main`, `detector` and `YOLO` are required sections; a document missing
/// any of them fails to decode. The two maps default to empty, which matches
/// how the authority treats documents written before scheduling and alerting
/// existed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub main: MainSection,
    pub detector: DetectorSection,
    #[serde(rename = "YOLO")]
    pub yolo: YoloSection,
    #[serde(default)]
    pub detection_schedule: BTreeMap<String, Vec<TimeWindow>>,
    #[serde(default)]
    pub alert_configs: BTreeMap<String, AlertDetails>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MainSection {
    pub model_name: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectorSection {
    #[serde(default)]
    pub available_classes: Vec<String>,
    #[serde(default)]
    pub tracked_class: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct YoloSection {
    pub weights: PathBuf,
}

/// One `{ start, end }` window of a detection schedule. Times are kept as the
/// authority's `"HH:MM"` strings and passed through untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertDetails {
    pub channels: AlertChannels,
    pub confidence_min: f64,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AlertChannels {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub viber: bool,
    #[serde(default)]
    pub api: bool,
}

impl ModelConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Whether detections of `class` are currently acted on. Tracking state
    /// is derived from `detector.tracked_class` membership, never stored.
    pub fn is_tracked(&self, class: &str) -> bool {
        self.detector.tracked_class.iter().any(|c| c == class)
    }

    pub fn model_name(&self) -> &str {
        &self.main.model_name
    }

    pub fn is_active(&self) -> bool {
        self.main.active
    }
}

#[cfg(test)]
pub(crate) fn test_config(name: &str, active: bool) -> ModelConfig {
    use std::collections::BTreeMap;

    let mut detection_schedule = BTreeMap::new();
    detection_schedule.insert(
        "person".to_string(),
        vec![TimeWindow {
            start: "08:00".to_string(),
            end: "20:00".to_string(),
        }],
    );

    let mut alert_configs = BTreeMap::new();
    alert_configs.insert(
        "person".to_string(),
        AlertDetails {
            channels: AlertChannels {
                email: true,
                viber: false,
                api: true,
            },
            confidence_min: 0.6,
            enabled: true,
        },
    );

    ModelConfig {
        main: MainSection {
            model_name: name.to_string(),
            active,
        },
        detector: DetectorSection {
            available_classes: vec!["person".into(), "car".into(), "dog".into()],
            tracked_class: vec!["person".into(), "car".into()],
        },
        yolo: YoloSection {
            weights: PathBuf::from(format!("/models/{name}.pt")),
        },
        detection_schedule,
        alert_configs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
main:
  model_name: person_detector_v2
  active: true
detector:
  available_classes:
    - person
    - car
    - dog
  tracked_class:
    - person
YOLO:
  weights: /opt/models/person_v2.pt
detection_schedule:
  person:
    - start: "08:00"
      end: "20:00"
    - start: "22:00"
      end: "23:00"
alert_configs:
  person:
    channels:
      email: true
      viber: false
      api: true
    confidence_min: 0.75
    enabled: true
"#;

    #[test]
    fn decodes_a_full_document() {
        let config = ModelConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.model_name(), "person_detector_v2");
        assert!(config.is_active());
        assert_eq!(config.detector.available_classes.len(), 3);
        assert!(config.is_tracked("person"));
        assert!(!config.is_tracked("dog"));
        assert_eq!(config.yolo.weights, PathBuf::from("/opt/models/person_v2.pt"));

        let windows = &config.detection_schedule["person"];
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, "08:00");
        assert_eq!(windows[0].end, "20:00");

        let alert = &config.alert_configs["person"];
        assert!(alert.channels.email);
        assert!(!alert.channels.viber);
        assert_eq!(alert.confidence_min, 0.75);
        assert!(alert.enabled);
    }

    #[test]
    fn schedule_and_alert_sections_default_to_empty() {
        let text = "\
main:
  model_name: bare
  active: false
detector:
  available_classes: [person]
  tracked_class: []
YOLO:
  weights: /opt/models/bare.pt
";
        let config = ModelConfig::from_yaml(text).unwrap();
        assert!(config.detection_schedule.is_empty());
        assert!(config.alert_configs.is_empty());
        assert!(!config.is_active());
    }

    #[test]
    fn missing_required_section_fails() {
        let text = "\
main:
  model_name: broken
detector:
  available_classes: [person]
  tracked_class: []
";
        let err = ModelConfig::from_yaml(text).unwrap_err();
        assert!(err.to_string().contains("YOLO"));
    }

    #[test]
    fn foreign_top_level_keys_are_tolerated() {
        let text = format!("{SAMPLE}\ndeep_sort:\n  max_age: 30\n");
        let config = ModelConfig::from_yaml(&text).unwrap();
        assert_eq!(config.model_name(), "person_detector_v2");
    }

    #[test]
    fn encoded_documents_decode_to_the_same_value() {
        let config = test_config("roundtrip", true);
        let text = config.to_yaml().unwrap();
        assert_eq!(ModelConfig::from_yaml(&text).unwrap(), config);
    }
}
