//! The slice of the Elastic Transcoder API the adapter talks to.
//!
//! [`ElasticTranscoderApi`] keeps the adapter independent from the SDK client
//! so the translation logic can run against an in-process fake.

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_elastictranscoder::config::{Credentials, Region};
use aws_sdk_elastictranscoder::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_elastictranscoder::types::{
    AudioParameters, CreateJobOutput, CreateJobPlaylist, Job, JobInput, Pipeline, Preset,
    Thumbnails, VideoParameters,
};
use aws_sdk_elastictranscoder::Client;

use crate::config::ElasticTranscoderConfig;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateJobRequest {
    pub pipeline_id: String,
    pub input_key: String,
    pub outputs: Vec<CreateJobOutput>,
    pub playlists: Vec<CreateJobPlaylist>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePresetRequest {
    pub name: String,
    pub description: String,
    pub container: String,
    pub video: VideoParameters,
    pub audio: AudioParameters,
    pub thumbnails: Thumbnails,
}

#[async_trait]
pub trait ElasticTranscoderApi: Send + Sync {
    async fn create_job(&self, request: CreateJobRequest) -> Result<Job, ApiError>;

    async fn read_job(&self, id: &str) -> Result<Job, ApiError>;

    async fn cancel_job(&self, id: &str) -> Result<(), ApiError>;

    async fn create_preset(&self, request: CreatePresetRequest) -> Result<Preset, ApiError>;

    async fn read_preset(&self, id: &str) -> Result<Preset, ApiError>;

    async fn delete_preset(&self, id: &str) -> Result<(), ApiError>;

    async fn read_pipeline(&self, id: &str) -> Result<Pipeline, ApiError>;
}

/// [`ElasticTranscoderApi`] backed by the AWS SDK.
pub struct SdkClient {
    client: Client,
}

impl SdkClient {
    pub fn new(config: &ElasticTranscoderConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vtbroker",
        );
        let region = if config.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            config.region.clone()
        };

        let mut builder = aws_sdk_elastictranscoder::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(region))
            .behavior_version_latest();
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

fn api_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if err.code() == Some("ResourceNotFoundException") {
        return ApiError::NotFound(err.message().unwrap_or(operation).to_string());
    }
    ApiError::Other(anyhow::Error::new(err).context(operation))
}

fn missing(operation: &'static str, what: &str) -> ApiError {
    ApiError::Other(anyhow!("{operation} returned no {what}"))
}

#[async_trait]
impl ElasticTranscoderApi for SdkClient {
    async fn create_job(&self, request: CreateJobRequest) -> Result<Job, ApiError> {
        let playlists = if request.playlists.is_empty() {
            None
        } else {
            Some(request.playlists)
        };
        let output = self
            .client
            .create_job()
            .pipeline_id(request.pipeline_id)
            .input(JobInput::builder().key(request.input_key).build())
            .set_outputs(Some(request.outputs))
            .set_playlists(playlists)
            .send()
            .await
            .map_err(|err| api_error("CreateJob", err))?;
        output.job().cloned().ok_or_else(|| missing("CreateJob", "job"))
    }

    async fn read_job(&self, id: &str) -> Result<Job, ApiError> {
        let output = self
            .client
            .read_job()
            .id(id)
            .send()
            .await
            .map_err(|err| api_error("ReadJob", err))?;
        output.job().cloned().ok_or_else(|| missing("ReadJob", "job"))
    }

    async fn cancel_job(&self, id: &str) -> Result<(), ApiError> {
        self.client
            .cancel_job()
            .id(id)
            .send()
            .await
            .map_err(|err| api_error("CancelJob", err))?;
        Ok(())
    }

    async fn create_preset(&self, request: CreatePresetRequest) -> Result<Preset, ApiError> {
        let description = if request.description.is_empty() {
            None
        } else {
            Some(request.description)
        };
        let output = self
            .client
            .create_preset()
            .name(request.name)
            .set_description(description)
            .container(request.container)
            .video(request.video)
            .audio(request.audio)
            .thumbnails(request.thumbnails)
            .send()
            .await
            .map_err(|err| api_error("CreatePreset", err))?;
        output
            .preset()
            .cloned()
            .ok_or_else(|| missing("CreatePreset", "preset"))
    }

    async fn read_preset(&self, id: &str) -> Result<Preset, ApiError> {
        let output = self
            .client
            .read_preset()
            .id(id)
            .send()
            .await
            .map_err(|err| api_error("ReadPreset", err))?;
        output
            .preset()
            .cloned()
            .ok_or_else(|| missing("ReadPreset", "preset"))
    }

    async fn delete_preset(&self, id: &str) -> Result<(), ApiError> {
        self.client
            .delete_preset()
            .id(id)
            .send()
            .await
            .map_err(|err| api_error("DeletePreset", err))?;
        Ok(())
    }

    async fn read_pipeline(&self, id: &str) -> Result<Pipeline, ApiError> {
        let output = self
            .client
            .read_pipeline()
            .id(id)
            .send()
            .await
            .map_err(|err| api_error("ReadPipeline", err))?;
        output
            .pipeline()
            .cloned()
            .ok_or_else(|| missing("ReadPipeline", "pipeline"))
    }
}
