//! Model configuration mirror for a video-detection appliance.
//!
//! The remote authority owns a set of model-configuration documents; this
//! crate mirrors them into a local cache, resolves the single active model,
//! projects its schedule and alert sections into flat rule records, and
//! forwards mutations to the authority followed by a resync.

pub mod config;
pub mod document;
pub mod error;
pub mod manager;
pub mod projection;
pub mod remote;
pub mod resolver;
pub mod store;
pub mod sync;

pub use config::{RetryPolicy, Settings};
pub use document::{AlertChannels, AlertDetails, ModelConfig, TimeWindow};
pub use error::{Error, Result};
pub use manager::{ModelManager, ModelSummary, MutationOutcome};
pub use projection::{project, AlertRule, DetectionRule, Projection};
pub use remote::{Backend, DetectionStatus, HttpBackend, Mutation, SystemLogEntry};
pub use resolver::ActiveModel;
pub use store::ModelStore;
pub use sync::{FetchStatus, SyncOutcome, SyncReport};
