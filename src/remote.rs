//! HTTP access to the remote model authority.
//!
//! The authority owns the model configuration documents; this client only
//! lists them, downloads them and posts mutations. Every request carries the
//! static API key in an `x-api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::Settings;
use crate::document::{AlertChannels, TimeWindow};
use crate::error::{Error, Result};

const API_KEY_HEADER: &str = "x-api-key";

/// A mutation accepted by the authority. Variants map one-to-one onto its
/// POST endpoints; payload key names follow the wire format.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    SelectModel {
        model_name: String,
    },
    DeleteModel {
        model_name: String,
    },
    ToggleRule {
        model_name: String,
        class_name: String,
        enabled: bool,
    },
    UpdateSchedule {
        model_name: String,
        class_name: String,
        periods: Vec<TimeWindow>,
        enabled: bool,
    },
    DeleteRule {
        model_name: String,
        class_name: String,
    },
    SaveAlert {
        model_name: String,
        object_type: String,
        channels: AlertChannels,
        confidence_min: f64,
        enabled: bool,
    },
    DeleteAlert {
        model_name: String,
        object_type: String,
    },
    ToggleAlert {
        model_name: String,
        object_type: String,
        enabled: bool,
    },
}

impl Mutation {
    /// Endpoint path on the authority. Two of them keep historical
    /// underscore spellings.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::SelectModel { .. } => "/select-model",
            Self::DeleteModel { .. } => "/delete-model",
            Self::ToggleRule { .. } => "/toggle_enable",
            Self::UpdateSchedule { .. } => "/update_schedule",
            Self::DeleteRule { .. } => "/delete-rule",
            Self::SaveAlert { .. } => "/save-alert",
            Self::DeleteAlert { .. } => "/delete-alert",
            Self::ToggleAlert { .. } => "/toggle-alert",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::SelectModel { model_name } | Self::DeleteModel { model_name } => json!({
                "model_name": model_name,
            }),
            Self::ToggleRule {
                model_name,
                class_name,
                enabled,
            } => json!({
                "class_name": class_name,
                "enabled": enabled,
                "model_name": model_name,
            }),
            Self::UpdateSchedule {
                model_name,
                class_name,
                periods,
                enabled,
            } => json!({
                "class_name": class_name,
                "periods": periods,
                "enabled": enabled,
                "model_name": model_name,
            }),
            Self::DeleteRule {
                model_name,
                class_name,
            } => json!({
                "class_name": class_name,
                "model_name": model_name,
            }),
            Self::SaveAlert {
                model_name,
                object_type,
                channels,
                confidence_min,
                enabled,
            } => json!({
                "object_type": object_type,
                "channels": channels,
                "confidence_min": confidence_min,
                "enabled": enabled,
                "model_name": model_name,
            }),
            Self::DeleteAlert {
                model_name,
                object_type,
            } => json!({
                "model_name": model_name,
                "object_type": object_type,
            }),
            Self::ToggleAlert {
                model_name,
                object_type,
                enabled,
            } => json!({
                "model_name": model_name,
                "object_type": object_type,
                "enabled": enabled,
            }),
        }
    }
}

/// Detection process state as reported by the authority.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectionStatus {
    pub status: String,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// One log line forwarded to the authority's system log. The timestamp is
/// left to the server, which fills it in on receipt.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemLogEntry {
    pub message: String,
    pub level: String,
    pub category: String,
}

impl SystemLogEntry {
    pub fn info(message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: "info".to_string(),
            category: category.into(),
        }
    }

    pub fn error(message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: "error".to_string(),
            category: category.into(),
        }
    }
}

/// An open artifact download: the body as a chunk stream, plus the length
/// the transport declared, when it declared one.
pub struct ArtifactFetch {
    pub declared_len: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

/// The remote model authority as seen by the engine. Production talks HTTP;
/// tests substitute an in-memory fake.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current catalog of artifact filenames, in catalog order. Single
    /// attempt; a failure here fails the whole refresh.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Open a download stream for one artifact.
    async fn fetch_model(&self, filename: &str) -> Result<ArtifactFetch>;

    /// Post one mutation. `Ok` means the authority accepted it.
    async fn execute(&self, mutation: &Mutation) -> Result<()>;

    async fn start_detection(&self) -> Result<()>;

    async fn stop_detection(&self) -> Result<()>;

    async fn detection_status(&self) -> Result<DetectionStatus>;

    /// Forward one log line to the authority. Best effort; callers fall back
    /// to local logging when this fails.
    async fn write_system_log(&self, entry: &SystemLogEntry) -> Result<()>;
}

/// `Backend` over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        check_auth(response)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_auth(response)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self.get("/list-models").await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(format!(
                "catalog request failed with status {status}: {body}"
            )));
        }

        let filenames: Vec<String> = response
            .json()
            .await
            .map_err(|e| Error::unavailable(format!("invalid catalog response: {e}")))?;
        debug!(count = filenames.len(), "fetched model catalog");
        Ok(filenames)
    }

    async fn fetch_model(&self, filename: &str) -> Result<ArtifactFetch> {
        let response = self.get(&format!("/download/{filename}")).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 4xx means the authority will not serve this artifact; only
            // server-side and transport failures are worth retrying.
            if status.is_client_error() {
                return Err(Error::download_refused(
                    filename,
                    format!("status {status}: {body}"),
                ));
            }
            return Err(Error::unavailable(format!(
                "download of {filename} failed with status {status}: {body}"
            )));
        }

        let declared_len = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(transport_error))
            .boxed();
        Ok(ArtifactFetch {
            declared_len,
            stream,
        })
    }

    async fn execute(&self, mutation: &Mutation) -> Result<()> {
        info!(endpoint = mutation.endpoint(), "posting mutation");
        let response = self.post(mutation.endpoint(), &mutation.payload()).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                format!("status {status}")
            } else {
                body
            };
            return Err(Error::rejected(message));
        }
        Ok(())
    }

    async fn start_detection(&self) -> Result<()> {
        let response = self.post("/start-detection", &json!({})).await?;
        accept_or_reject(response).await
    }

    async fn stop_detection(&self) -> Result<()> {
        let response = self.post("/stop-detection", &json!({})).await?;
        accept_or_reject(response).await
    }

    async fn detection_status(&self) -> Result<DetectionStatus> {
        let response = self.get("/detection-status").await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(format!(
                "status request failed with status {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::unavailable(format!("invalid status response: {e}")))
    }

    async fn write_system_log(&self, entry: &SystemLogEntry) -> Result<()> {
        let body = json!({
            "message": entry.message,
            "type": entry.level,
            "category": entry.category,
        });
        let response = self.post("/write-system-log", &body).await?;
        accept_or_reject(response).await
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::unavailable(e.to_string())
}

/// Credential rejections are terminal and mapped before anything else.
fn check_auth(response: reqwest::Response) -> Result<reqwest::Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthRejected),
        _ => Ok(response),
    }
}

/// Map a non-2xx answer to a rejection carrying the server's own text.
async fn accept_or_reject(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("status {status}")
        } else {
            body
        };
        return Err(Error::rejected(message));
    }
    Ok(())
}
