use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod callback;
pub mod config;
pub mod db;
pub mod error;
pub mod provider;
pub mod registry;
pub mod service;
pub mod telemetry;

/// Polling interval used when a job is submitted without one (seconds).
pub const DEFAULT_CALLBACK_INTERVAL: u32 = 5;

/// A transcoding job as tracked by the broker.
///
/// Created once at submission time. Status is never stored here; it is always
/// fetched fresh from the provider that owns the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub provider_name: String,
    pub provider_job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_callback_url: Option<String>,
    pub status_callback_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_params: Option<StreamingParams>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn has_callbacks(&self) -> bool {
        self.status_callback_url.is_some() || self.completion_callback_url.is_some()
    }
}

/// Adaptive streaming settings for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingParams {
    #[serde(default)]
    pub protocol: String,
    /// Segment duration in seconds.
    #[serde(default)]
    pub segment_duration: u32,
    #[serde(default)]
    pub playlist_file_name: String,
}

/// A provider-agnostic encoding recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub container: String,
    #[serde(default)]
    pub rate_control: String,
    #[serde(default)]
    pub video: VideoPreset,
    #[serde(default)]
    pub audio: AudioPreset,
    /// Provider name to the provider's native preset id.
    #[serde(default)]
    pub provider_mapping: HashMap<String, String>,
}

impl Preset {
    /// Native preset id for `provider`, ignoring blank entries.
    pub fn provider_id(&self, provider: &str) -> Option<&str> {
        self.provider_mapping
            .get(provider)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPreset {
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bits per second.
    pub bitrate: u64,
    pub gop_size: Option<u32>,
    #[serde(default)]
    pub gop_mode: GopMode,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub profile_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPreset {
    pub codec: String,
    /// Bits per second.
    pub bitrate: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GopMode {
    Fixed,
    #[default]
    Variable,
}
