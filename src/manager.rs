//! High-level facade wiring the store, the sync engine and the backend.
//!
//! Mutations follow one flow: resolve the active model where the payload
//! needs its name, post to the authority, and resync the mirror on
//! acceptance. The authority owns the documents; nothing is edited locally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, Settings};
use crate::document::ModelConfig;
use crate::error::Error;
use crate::projection::{project, AlertRule, DetectionRule};
use crate::remote::{Backend, DetectionStatus, HttpBackend, Mutation, SystemLogEntry};
use crate::resolver;
use crate::store::ModelStore;
use crate::sync::{SyncEngine, SyncReport};

const PAUSE_BETWEEN_STOP_AND_START: Duration = Duration::from_secs(2);

/// Consumer-facing snapshot of one cached document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub objects: Vec<String>,
    pub weights: PathBuf,
    pub rules: Vec<DetectionRule>,
    pub alerts: Vec<AlertRule>,
    pub active: bool,
}

impl ModelSummary {
    fn from_config(config: &ModelConfig) -> Self {
        let projection = project(config);
        Self {
            name: config.model_name().to_string(),
            objects: config.detector.available_classes.clone(),
            weights: config.yolo.weights.clone(),
            rules: projection.rules,
            alerts: projection.alerts,
            active: config.is_active(),
        }
    }
}

/// What the dashboard hears back from a mutation: never an error, always a
/// success flag plus a display message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MutationOutcome {
    pub success: bool,
    pub message: String,
}

impl MutationOutcome {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// The server's rejection text is surfaced as-is; other failures use the
/// error's display form.
fn failure_message(e: &Error) -> String {
    match e {
        Error::MutationRejected(body) => body.clone(),
        other => other.to_string(),
    }
}

pub struct ModelManager {
    backend: Arc<dyn Backend>,
    store: Arc<ModelStore>,
    engine: SyncEngine,
}

impl ModelManager {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<ModelStore>, retry: RetryPolicy) -> Self {
        let engine = SyncEngine::new(Arc::clone(&backend), Arc::clone(&store), retry);
        Self {
            backend,
            store,
            engine,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(settings)?;
        let store = ModelStore::new(settings.cache_dir.clone());
        Ok(Self::new(
            Arc::new(backend),
            Arc::new(store),
            settings.retry.clone(),
        ))
    }

    /// Mirror the remote catalog into the local cache.
    pub async fn refresh(&self) -> SyncReport {
        self.engine.refresh().await
    }

    /// Summaries of every cached document, unreadable ones skipped.
    pub async fn model_summaries(&self) -> Vec<ModelSummary> {
        let paths = match self.store.enumerate().await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "failed to list the model cache");
                return Vec::new();
            }
        };

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match self.store.read_document(&path).await {
                Ok(config) => summaries.push(ModelSummary::from_config(&config)),
                Err(e) => warn!(error = %e, "skipping unreadable document"),
            }
        }
        summaries
    }

    /// Summary of the active model, when one resolves.
    pub async fn active_model(&self) -> Option<ModelSummary> {
        resolver::resolve(&self.store)
            .await
            .map(|active| ModelSummary::from_config(&active.config))
    }

    /// Mark `model_name` active on the authority. The authority clears the
    /// flag on every other document; the resync mirrors the result.
    pub async fn select_model(&self, model_name: &str) -> MutationOutcome {
        self.apply(
            Mutation::SelectModel {
                model_name: model_name.to_string(),
            },
            "Selected model successfully",
        )
        .await
    }

    /// Delete `model_name` on the authority, then wipe the cache and pull
    /// what remains, so removed documents cannot linger locally.
    pub async fn delete_model(&self, model_name: &str) -> MutationOutcome {
        let mutation = Mutation::DeleteModel {
            model_name: model_name.to_string(),
        };
        if let Err(e) = self.backend.execute(&mutation).await {
            warn!(endpoint = mutation.endpoint(), error = %e, "mutation rejected");
            return MutationOutcome::failed(failure_message(&e));
        }

        if let Err(e) = self.store.wipe().await {
            warn!(error = %e, "cache wipe failed, resyncing over the old contents");
        }
        self.engine.refresh().await;
        MutationOutcome::ok("Deleted model successfully")
    }

    /// Enable or disable tracking of a class on the active model.
    pub async fn toggle_rule(&self, class_name: &str, enabled: bool) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::ToggleRule {
                model_name,
                class_name: class_name.to_string(),
                enabled,
            },
            "Toggled rule successfully",
        )
        .await
    }

    /// Write a schedule row back to the active model as its single window.
    pub async fn save_rule(&self, rule: &DetectionRule) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::UpdateSchedule {
                model_name,
                class_name: rule.object_type.clone(),
                periods: vec![crate::document::TimeWindow {
                    start: rule.start_time.clone(),
                    end: rule.end_time.clone(),
                }],
                enabled: rule.enabled,
            },
            "Saved rule successfully",
        )
        .await
    }

    /// Drop a class's schedule and tracking from the active model.
    pub async fn delete_rule(&self, class_name: &str) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::DeleteRule {
                model_name,
                class_name: class_name.to_string(),
            },
            "Deleted rule successfully",
        )
        .await
    }

    /// Create or replace an alert row on the active model.
    pub async fn save_alert_config(&self, alert: &AlertRule) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::SaveAlert {
                model_name,
                object_type: alert.object_type.clone(),
                channels: alert.channels.clone(),
                confidence_min: alert.confidence_min,
                enabled: alert.enabled,
            },
            "Saved alert config successfully",
        )
        .await
    }

    pub async fn delete_alert_config(&self, object_type: &str) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::DeleteAlert {
                model_name,
                object_type: object_type.to_string(),
            },
            "Deleted alert config successfully",
        )
        .await
    }

    pub async fn toggle_alert(&self, object_type: &str, enabled: bool) -> MutationOutcome {
        let Some(model_name) = self.active_model_name().await else {
            return MutationOutcome::failed(NO_ACTIVE_MODEL);
        };
        self.apply(
            Mutation::ToggleAlert {
                model_name,
                object_type: object_type.to_string(),
                enabled,
            },
            "Toggled alert successfully",
        )
        .await
    }

    pub async fn start_detection(&self) -> MutationOutcome {
        self.system_log(SystemLogEntry::info(
            "Attempting to start detection system",
            "detection",
        ))
        .await;

        match self.backend.start_detection().await {
            Ok(()) => {
                self.system_log(SystemLogEntry::info(
                    "Detection system started successfully",
                    "detection",
                ))
                .await;
                MutationOutcome::ok("Detection system started successfully")
            }
            Err(e) => {
                let message = failure_message(&e);
                self.system_log(SystemLogEntry::error(
                    format!("Detection system start failed: {message}"),
                    "detection",
                ))
                .await;
                MutationOutcome::failed(message)
            }
        }
    }

    pub async fn stop_detection(&self) -> MutationOutcome {
        self.system_log(SystemLogEntry::info(
            "Attempting to stop detection system",
            "detection",
        ))
        .await;

        match self.backend.stop_detection().await {
            Ok(()) => {
                self.system_log(SystemLogEntry::info(
                    "Detection system stopped successfully",
                    "detection",
                ))
                .await;
                MutationOutcome::ok("Detection system stopped successfully")
            }
            Err(e) => {
                let message = failure_message(&e);
                self.system_log(SystemLogEntry::error(
                    format!("Detection system stop failed: {message}"),
                    "detection",
                ))
                .await;
                MutationOutcome::failed(message)
            }
        }
    }

    /// Stop, wait for the appliance to settle, start again.
    pub async fn restart_detection(&self) -> MutationOutcome {
        self.system_log(SystemLogEntry::info(
            "Attempting to restart detection system",
            "detection",
        ))
        .await;

        if let Err(e) = self.backend.stop_detection().await {
            let message = failure_message(&e);
            self.system_log(SystemLogEntry::error(
                format!("Detection system restart failed: {message}"),
                "detection",
            ))
            .await;
            return MutationOutcome::failed(message);
        }

        tokio::time::sleep(PAUSE_BETWEEN_STOP_AND_START).await;

        match self.backend.start_detection().await {
            Ok(()) => {
                self.system_log(SystemLogEntry::info(
                    "Detection system restarted successfully",
                    "detection",
                ))
                .await;
                MutationOutcome::ok("Detection system restarted successfully")
            }
            Err(e) => {
                let message = failure_message(&e);
                self.system_log(SystemLogEntry::error(
                    format!("Detection system restart failed: {message}"),
                    "detection",
                ))
                .await;
                MutationOutcome::failed(message)
            }
        }
    }

    pub async fn detection_status(&self) -> crate::error::Result<DetectionStatus> {
        self.backend.detection_status().await
    }

    async fn active_model_name(&self) -> Option<String> {
        resolver::resolve(&self.store)
            .await
            .map(|active| active.config.main.model_name)
    }

    /// Post one mutation and resync on acceptance. A failed post changes
    /// nothing locally. A partially failed resync still reports the mutation
    /// successful; the mirror catches up on the next refresh.
    async fn apply(&self, mutation: Mutation, success_message: &str) -> MutationOutcome {
        if let Err(e) = self.backend.execute(&mutation).await {
            warn!(endpoint = mutation.endpoint(), error = %e, "mutation rejected");
            return MutationOutcome::failed(failure_message(&e));
        }

        info!(endpoint = mutation.endpoint(), "mutation accepted, resyncing");
        self.engine.refresh().await;
        MutationOutcome::ok(success_message)
    }

    /// Best-effort forwarding to the authority's system log, falling back to
    /// local logging when it cannot be reached.
    async fn system_log(&self, entry: SystemLogEntry) {
        if let Err(e) = self.backend.write_system_log(&entry).await {
            info!(
                level = %entry.level,
                category = %entry.category,
                "{}",
                entry.message
            );
            debug!(error = %e, "backend system log unavailable, logged locally");
        }
    }
}

const NO_ACTIVE_MODEL: &str = "no active model in the local cache";
