//! Error classification at the workflow boundary.
//!
//! Recognized failures are turned into client-facing categories as early as
//! possible; everything else stays an opaque [`ServiceError::Internal`].

use reqwest::StatusCode;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request cannot be satisfied as given.
    #[error("{0}")]
    InvalidJob(String),

    /// No job record with this id.
    #[error("job {0:?} not found")]
    JobNotFound(String),

    #[error("preset {0:?} not found")]
    PresetNotFound(String),

    #[error("provider {0:?} not found")]
    ProviderNotFound(String),

    /// The job record exists but its provider no longer knows the job.
    #[error("job {job_id:?} not found in provider {provider:?}: {message}")]
    JobGone {
        job_id: String,
        provider: String,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidJob(_) => StatusCode::BAD_REQUEST,
            ServiceError::JobNotFound(_)
            | ServiceError::PresetNotFound(_)
            | ServiceError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::JobGone { .. } => StatusCode::GONE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error payload.
    pub fn body(&self) -> serde_json::Value {
        json!({ "error": format!("{self:#}") })
    }
}
