use crate::callback::{self, Notifier, MAX_JOB_TIMEOUT};
use crate::config::Config;
use crate::db::{DbError, Repository};
use crate::error::ServiceError;
use crate::provider::{
    Description, JobStatus, ProviderError, TranscodeOutput, TranscodeProfile, TranscodingProvider,
};
use crate::registry::ProviderRegistry;
use crate::{Job, Preset, StreamingParams, DEFAULT_CALLBACK_INTERVAL};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::*;
use uuid::Uuid;

/// A request to transcode one source into a list of outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJobRequest {
    pub provider: String,
    pub source: String,
    /// Desired outputs, in order. Each names a preset; in JSON an entry may
    /// be a bare preset id (`["mp4_720p", "hls_480p"]`) or an object with a
    /// `preset` and an optional `fileName`.
    pub outputs: Vec<OutputRequest>,
    #[serde(default)]
    pub streaming_params: Option<StreamingParams>,
    #[serde(default)]
    pub status_callback_url: Option<String>,
    /// Seconds between status polls; defaults to [`DEFAULT_CALLBACK_INTERVAL`].
    #[serde(default)]
    pub status_callback_interval: u32,
    #[serde(default)]
    pub completion_callback_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "OutputEntry")]
pub struct OutputRequest {
    pub preset: String,
    /// Defaults to `<source stem>_<preset>.<container>`.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl From<&str> for OutputRequest {
    fn from(preset: &str) -> Self {
        Self {
            preset: preset.to_string(),
            file_name: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutputEntry {
    Preset(String),
    #[serde(rename_all = "camelCase")]
    Output {
        preset: String,
        #[serde(default)]
        file_name: Option<String>,
    },
}

impl From<OutputEntry> for OutputRequest {
    fn from(entry: OutputEntry) -> Self {
        match entry {
            OutputEntry::Preset(preset) => Self {
                preset,
                file_name: None,
            },
            OutputEntry::Output { preset, file_name } => Self { preset, file_name },
        }
    }
}

/// Job lifecycle workflows on top of the provider registry and the store.
///
/// Cheap to clone; every clone shares the same registry, store and
/// background task set.
#[derive(Clone)]
pub struct TranscodingService {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn Repository>,
    notifier: Notifier,
    tasks: TaskTracker,
    cancel_token: CancellationToken,
    job_timeout: Duration,
}

impl TranscodingService {
    pub fn new(
        config: Config,
        registry: ProviderRegistry,
        repository: Arc<dyn Repository>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            repository,
            notifier: Notifier::new(),
            tasks: TaskTracker::new(),
            cancel_token,
            job_timeout: MAX_JOB_TIMEOUT,
        }
    }

    /// Caps how long callback delivery may run for each job.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout.min(MAX_JOB_TIMEOUT);
        self
    }

    /// Submit a job and start callback delivery for it when requested.
    ///
    /// Returns as soon as the job is persisted.
    #[instrument(skip_all, fields(provider = %request.provider, job_id = field::Empty))]
    pub async fn new_job(&self, request: NewJobRequest) -> Result<Job, ServiceError> {
        if request.provider.is_empty() {
            return Err(ServiceError::InvalidJob("missing provider".to_string()));
        }
        if request.source.is_empty() {
            return Err(ServiceError::InvalidJob("missing source media".to_string()));
        }
        if request.outputs.is_empty() {
            return Err(ServiceError::InvalidJob("no outputs requested".to_string()));
        }

        let provider = self
            .registry
            .build(&request.provider, &self.config)
            .map_err(|err| match err {
                ProviderError::NotRegistered(_) => ServiceError::InvalidJob(err.to_string()),
                ProviderError::InvalidConfig(_) => ServiceError::InvalidJob(format!(
                    "error initializing provider {:?} for new job: {err}",
                    request.provider
                )),
                err => ServiceError::Internal(anyhow::Error::new(err).context(format!(
                    "error initializing provider {:?} for new job",
                    request.provider
                ))),
            })?;

        let mut presets = Vec::with_capacity(request.outputs.len());
        for output in &request.outputs {
            let preset = self
                .repository
                .get_preset(&output.preset)
                .await
                .map_err(|err| match err {
                    DbError::PresetNotFound(_) => ServiceError::InvalidJob(err.to_string()),
                    err => ServiceError::Internal(anyhow::Error::new(err)),
                })?;
            presets.push(preset);
        }

        let streaming_params = request
            .streaming_params
            .filter(|params| !params.protocol.is_empty());
        let outputs = request
            .outputs
            .iter()
            .zip(&presets)
            .map(|(output, preset)| TranscodeOutput {
                file_name: output
                    .file_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| default_file_name(&request.source, preset)),
                preset: preset.clone(),
            })
            .collect();
        let profile = TranscodeProfile {
            source_media: request.source,
            presets,
            streaming_params: streaming_params.clone(),
            outputs,
        };

        let mut job = Job {
            id: Uuid::new_v4().simple().to_string(),
            provider_name: request.provider,
            provider_job_id: String::new(),
            status_callback_url: request.status_callback_url.filter(|url| !url.is_empty()),
            status_callback_interval: match request.status_callback_interval {
                0 => DEFAULT_CALLBACK_INTERVAL,
                interval => interval,
            },
            completion_callback_url: request
                .completion_callback_url
                .filter(|url| !url.is_empty()),
            streaming_params,
            created_at: Utc::now(),
        };
        Span::current().record("job_id", job.id.as_str());

        let status = provider
            .transcode(&job, &profile)
            .await
            .map_err(|err| match err {
                ProviderError::PresetNotFound(_)
                | ProviderError::PresetMapNotFound { .. }
                | ProviderError::InvalidConfig(_) => ServiceError::InvalidJob(err.to_string()),
                err => ServiceError::Internal(
                    anyhow::Error::new(err)
                        .context(format!("Error with provider {:?}", job.provider_name)),
                ),
            })?;
        job.provider_job_id = status.provider_job_id;

        self.repository
            .create_job(&job)
            .await
            .map_err(|err| anyhow::Error::new(err).context("persisting job"))?;
        info!(provider_job_id = %job.provider_job_id, "Job submitted");

        if job.has_callbacks() {
            self.spawn_callbacks(job.clone());
        }
        Ok(job)
    }

    fn spawn_callbacks(&self, job: Job) {
        let deadline = Instant::now() + self.job_timeout;
        let span = info_span!("callback", job_id = %job.id);
        self.tasks.spawn(
            callback::deliver(
                self.clone(),
                job,
                self.notifier.clone(),
                self.cancel_token.child_token(),
                deadline,
            )
            .instrument(span),
        );
    }

    /// Fetch the job record and ask its provider for the current status.
    #[instrument(skip(self))]
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus, ServiceError> {
        let job = self.get_job(job_id).await?;
        let provider = self.provider_for(&job)?;
        let mut status = provider
            .job_status(&job)
            .await
            .map_err(|err| provider_error(&job, err))?;
        status.job_id = job.id.clone();
        status.provider_name = job.provider_name.clone();
        Ok(status)
    }

    /// Cancel the job on its provider and return the resulting status.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatus, ServiceError> {
        let job = self.get_job(job_id).await?;
        let provider = self.provider_for(&job)?;
        provider
            .cancel_job(&job.provider_job_id)
            .await
            .map_err(|err| provider_error(&job, err))?;
        info!("Job canceled");
        self.job_status(job_id).await
    }

    /// Create `preset` on every named provider and store it with the
    /// resulting provider mapping.
    #[instrument(skip_all, fields(preset = %preset.name))]
    pub async fn create_preset(
        &self,
        mut preset: Preset,
        providers: &[String],
    ) -> Result<Preset, ServiceError> {
        if preset.name.is_empty() {
            return Err(ServiceError::InvalidJob("preset name is required".to_string()));
        }
        if providers.is_empty() {
            return Err(ServiceError::InvalidJob(
                "at least one provider is required".to_string(),
            ));
        }
        match self.repository.get_preset(&preset.name).await {
            Ok(_) => {
                return Err(ServiceError::InvalidJob(
                    DbError::PresetAlreadyExists(preset.name).to_string(),
                ))
            }
            Err(DbError::PresetNotFound(_)) => {}
            Err(err) => return Err(ServiceError::Internal(anyhow::Error::new(err))),
        }

        for name in providers {
            let provider = self.registry.build(name, &self.config).map_err(|err| match err {
                ProviderError::NotRegistered(_) | ProviderError::InvalidConfig(_) => {
                    ServiceError::InvalidJob(err.to_string())
                }
                err => ServiceError::Internal(anyhow::Error::new(err)),
            })?;
            let id = provider.create_preset(&preset).await.map_err(|err| {
                ServiceError::Internal(
                    anyhow::Error::new(err)
                        .context(format!("creating preset on provider {name:?}")),
                )
            })?;
            debug!(provider = %name, provider_preset_id = %id, "Preset created");
            preset.provider_mapping.insert(name.clone(), id);
        }

        self.repository
            .create_preset(&preset)
            .await
            .map_err(|err| match err {
                DbError::PresetAlreadyExists(_) => ServiceError::InvalidJob(err.to_string()),
                err => ServiceError::Internal(anyhow::Error::new(err)),
            })?;
        Ok(preset)
    }

    /// Delete a preset from every provider it is mapped to and from the store.
    ///
    /// Provider-side failures do not stop the deletion; the names of the
    /// providers that failed are returned.
    #[instrument(skip(self))]
    pub async fn delete_preset(&self, preset_id: &str) -> Result<Vec<String>, ServiceError> {
        let preset = self
            .repository
            .get_preset(preset_id)
            .await
            .map_err(|err| match err {
                DbError::PresetNotFound(id) => ServiceError::PresetNotFound(id),
                err => ServiceError::Internal(anyhow::Error::new(err)),
            })?;

        let mut failed = Vec::new();
        for (name, provider_preset_id) in &preset.provider_mapping {
            let result = match self.registry.build(name, &self.config) {
                Ok(provider) => provider.delete_preset(provider_preset_id).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                warn!(provider = %name, error = %err, "Failed to delete preset on provider");
                failed.push(name.clone());
            }
        }

        self.repository
            .delete_preset(preset_id)
            .await
            .map_err(|err| match err {
                DbError::PresetNotFound(id) => ServiceError::PresetNotFound(id),
                err => ServiceError::Internal(anyhow::Error::new(err)),
            })?;
        failed.sort();
        Ok(failed)
    }

    /// Providers usable with the current configuration.
    pub fn list_providers(&self) -> Vec<String> {
        self.registry.list_providers(&self.config)
    }

    pub async fn describe_provider(&self, name: &str) -> Result<Description, ServiceError> {
        self.registry
            .describe(name, &self.config)
            .await
            .map_err(|err| match err {
                ProviderError::NotRegistered(name) => ServiceError::ProviderNotFound(name),
                err => ServiceError::Internal(anyhow::Error::new(err)),
            })
    }

    /// Describe every registered provider, configured or not.
    pub async fn describe_providers(&self) -> Result<Vec<Description>, ServiceError> {
        self.registry
            .describe_all(&self.config)
            .await
            .into_iter()
            .map(|description| description.map_err(|err| ServiceError::Internal(err.into())))
            .collect()
    }

    /// Wait until every callback delivery task has finished.
    pub async fn wait_for_callbacks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Stop all callback delivery and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.wait_for_callbacks().await;
        info!("Transcoding service stopped.");
    }

    async fn get_job(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.repository.get_job(job_id).await.map_err(|err| match err {
            DbError::JobNotFound(id) => ServiceError::JobNotFound(id),
            err => ServiceError::Internal(
                anyhow::Error::new(err).context(format!("error retrieving job with id {job_id:?}")),
            ),
        })
    }

    fn provider_for(&self, job: &Job) -> Result<Box<dyn TranscodingProvider>, ServiceError> {
        self.registry
            .build(&job.provider_name, &self.config)
            .map_err(|err| {
                ServiceError::Internal(anyhow::Error::new(err).context(format!(
                    "error initializing provider {:?} on job id {:?}",
                    job.provider_name, job.id
                )))
            })
    }
}

fn provider_error(job: &Job, err: ProviderError) -> ServiceError {
    match err {
        ProviderError::JobNotFound(message) => ServiceError::JobGone {
            job_id: job.id.clone(),
            provider: job.provider_name.clone(),
            message,
        },
        err => ServiceError::Internal(anyhow::Error::new(err).context(format!(
            "Error with provider {:?} when trying to retrieve job id {:?}",
            job.provider_name, job.id
        ))),
    }
}

fn default_file_name(source: &str, preset: &Preset) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    format!("{}_{}.{}", stem, preset.name, preset.container)
}
