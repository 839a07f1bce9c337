//! Provider abstraction shared by every transcoding backend.
//!
//! A provider wraps one external transcoding service and exposes a uniform
//! interface for submitting jobs, querying them and managing presets. Concrete
//! backends are registered by name in the
//! [`ProviderRegistry`](crate::registry::ProviderRegistry) and constructed
//! fresh for every operation through their [`Factory`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{Job, Preset, StreamingParams};

pub mod elastictranscoder;

/// Job state, shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Started,
    Finished,
    Failed,
    Canceled,
}

impl Status {
    /// `true` once no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Finished | Status::Failed | Status::Canceled)
    }
}

/// A snapshot of a job as seen by its provider. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_id: String,
    pub provider_name: String,
    pub provider_job_id: String,
    pub status: Status,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    /// Opaque provider-specific details, for diagnostics only.
    #[serde(default)]
    pub provider_status: serde_json::Value,
    #[serde(default)]
    pub media_info: MediaInfo,
    #[serde(default)]
    pub output: JobOutput,
}

impl JobStatus {
    /// Status of a job the provider just accepted.
    pub fn queued(provider_name: &str, provider_job_id: impl Into<String>) -> Self {
        Self {
            job_id: String::new(),
            provider_name: provider_name.to_string(),
            provider_job_id: provider_job_id.into(),
            status: Status::Queued,
            progress: 0.0,
            provider_status: serde_json::Value::Null,
            media_info: MediaInfo::default(),
            output: JobOutput::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(with = "duration_millis", default)]
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub destination: String,
    pub files: Vec<OutputFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub path: String,
    pub container: String,
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
}

/// Everything a provider needs to submit one job. Lives for a single
/// submission call only.
#[derive(Debug, Clone, Default)]
pub struct TranscodeProfile {
    pub source_media: String,
    pub presets: Vec<Preset>,
    pub streaming_params: Option<StreamingParams>,
    pub outputs: Vec<TranscodeOutput>,
}

/// A single desired output file.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub file_name: String,
    pub preset: Preset,
}

/// Static description of what a provider can handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub input_formats: Vec<String>,
    pub output_formats: Vec<String>,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A provider as reported by [`ProviderRegistry::describe`](crate::registry::ProviderRegistry::describe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub name: String,
    pub capabilities: Capabilities,
    pub health: Health,
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("preset {0:?} not found")]
    PresetNotFound(String),

    #[error("preset {preset:?} has no mapping for provider {provider:?}")]
    PresetMapNotFound { preset: String, provider: String },

    #[error("invalid provider config: {0}")]
    InvalidConfig(String),

    #[error("job {0:?} not found in the provider")]
    JobNotFound(String),

    #[error("provider {0:?} is not registered")]
    NotRegistered(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Interface implemented by every transcoding backend.
#[async_trait]
pub trait TranscodingProvider: Send + Sync {
    /// Submit a new job. `job` carries the broker-side id that outputs are
    /// namespaced under.
    async fn transcode(
        &self,
        job: &Job,
        profile: &TranscodeProfile,
    ) -> Result<JobStatus, ProviderError>;

    /// Current status of the provider-side job referenced by `job`.
    async fn job_status(&self, job: &Job) -> Result<JobStatus, ProviderError>;

    /// Create the preset on the backend, returning the backend's id for it.
    async fn create_preset(&self, preset: &Preset) -> Result<String, ProviderError>;

    async fn delete_preset(&self, preset_id: &str) -> Result<(), ProviderError>;

    async fn cancel_job(&self, provider_job_id: &str) -> Result<(), ProviderError>;

    /// Cheap read-only probe that the backend is reachable and configured.
    async fn healthcheck(&self) -> Result<(), ProviderError>;

    fn capabilities(&self) -> Capabilities;
}

/// Builds a provider instance from the live configuration.
pub type Factory =
    Arc<dyn Fn(&Config) -> Result<Box<dyn TranscodingProvider>, ProviderError> + Send + Sync>;

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
