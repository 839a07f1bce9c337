//! Shared fixtures for service-level tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vtbroker::config::Config;
use vtbroker::db::{MemoryStore, Repository};
use vtbroker::provider::{
    Capabilities, JobStatus, ProviderError, Status, TranscodeProfile, TranscodingProvider,
};
use vtbroker::registry::ProviderRegistry;
use vtbroker::service::{NewJobRequest, OutputRequest, TranscodingService};
use vtbroker::{Job, Preset};

pub const FAKE: &str = "fake";

/// Shared script and call log for [`ScriptedProvider`] instances.
#[derive(Default)]
pub struct Script {
    /// Statuses handed out by successive `job_status` calls; the last one repeats.
    pub statuses: Mutex<VecDeque<Status>>,
    pub lost_job: Mutex<bool>,
    pub transcoded: Mutex<Vec<(Job, TranscodeProfile)>>,
    pub canceled: Mutex<Vec<String>>,
    pub deleted_presets: Mutex<Vec<String>>,
}

impl Script {
    pub fn with_statuses(statuses: &[Status]) -> Arc<Self> {
        let script = Script::default();
        *script.statuses.lock().unwrap() = statuses.iter().copied().collect();
        Arc::new(script)
    }

    fn next_status(&self) -> Status {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().copied().unwrap_or(Status::Queued)
        }
    }
}

pub struct ScriptedProvider {
    script: Arc<Script>,
}

#[async_trait]
impl TranscodingProvider for ScriptedProvider {
    async fn transcode(
        &self,
        job: &Job,
        profile: &TranscodeProfile,
    ) -> Result<JobStatus, ProviderError> {
        for output in &profile.outputs {
            if output.preset.provider_id(FAKE).is_none() {
                return Err(ProviderError::PresetMapNotFound {
                    preset: output.preset.name.clone(),
                    provider: FAKE.to_string(),
                });
            }
        }
        self.script
            .transcoded
            .lock()
            .unwrap()
            .push((job.clone(), profile.clone()));
        Ok(JobStatus::queued(FAKE, format!("fake-{}", job.id)))
    }

    async fn job_status(&self, job: &Job) -> Result<JobStatus, ProviderError> {
        if *self.script.lost_job.lock().unwrap() {
            return Err(ProviderError::JobNotFound(job.provider_job_id.clone()));
        }
        let mut status = JobStatus::queued(FAKE, job.provider_job_id.clone());
        status.status = self.script.next_status();
        status.progress = match status.status {
            Status::Queued => 0.0,
            Status::Started => 50.0,
            _ => 100.0,
        };
        Ok(status)
    }

    async fn create_preset(&self, preset: &Preset) -> Result<String, ProviderError> {
        Ok(format!("fake-{}", preset.name))
    }

    async fn delete_preset(&self, preset_id: &str) -> Result<(), ProviderError> {
        self.script
            .deleted_presets
            .lock()
            .unwrap()
            .push(preset_id.to_string());
        Ok(())
    }

    async fn cancel_job(&self, provider_job_id: &str) -> Result<(), ProviderError> {
        self.script
            .canceled
            .lock()
            .unwrap()
            .push(provider_job_id.to_string());
        *self.script.statuses.lock().unwrap() = VecDeque::from([Status::Canceled]);
        Ok(())
    }

    async fn healthcheck(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

pub fn registry(script: &Arc<Script>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::builtin();
    let script = script.clone();
    registry
        .register(
            FAKE,
            Arc::new(move |_: &Config| {
                Ok(Box::new(ScriptedProvider {
                    script: script.clone(),
                }) as Box<dyn TranscodingProvider>)
            }),
        )
        .unwrap();
    registry
}

pub fn preset(name: &str, container: &str, mapping: &[(&str, &str)]) -> Preset {
    let mut preset = Preset {
        name: name.to_string(),
        container: container.to_string(),
        ..Default::default()
    };
    for (provider, id) in mapping {
        preset
            .provider_mapping
            .insert(provider.to_string(), id.to_string());
    }
    preset
}

pub struct Harness {
    pub service: TranscodingService,
    pub store: MemoryStore,
    pub script: Arc<Script>,
    pub cancel_token: CancellationToken,
}

impl Harness {
    pub async fn new(statuses: &[Status]) -> Self {
        Self::with_config(statuses, Config::default()).await
    }

    pub async fn with_config(statuses: &[Status], config: Config) -> Self {
        let script = Script::with_statuses(statuses);
        let store = MemoryStore::new();
        store
            .create_preset(&preset("mp4_720p", "mp4", &[(FAKE, "fake-mp4")]))
            .await
            .unwrap();
        store
            .create_preset(&preset("hls_480p", "m3u8", &[(FAKE, "fake-hls")]))
            .await
            .unwrap();
        let cancel_token = CancellationToken::new();
        let service = TranscodingService::new(
            config,
            registry(&script),
            Arc::new(store.clone()),
            cancel_token.clone(),
        );
        Self {
            service,
            store,
            script,
            cancel_token,
        }
    }
}

pub fn request(presets: &[&str]) -> NewJobRequest {
    NewJobRequest {
        provider: FAKE.to_string(),
        source: "s3://source-bucket/movies/movie.mov".to_string(),
        outputs: presets
            .iter()
            .map(|preset| OutputRequest::from(*preset))
            .collect(),
        ..Default::default()
    }
}
