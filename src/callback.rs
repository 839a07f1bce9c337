//! Push delivery of job status to caller-supplied URLs.
//!
//! One task per job with callbacks. The task polls the job status, posts
//! it to the status callback on every iteration and to the completion
//! callback once the job is terminal. It never outlives its deadline.

use crate::provider::JobStatus;
use crate::service::TranscodingService;
use crate::Job;
use anyhow::{bail, Context, Error};
use reqwest::Client;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Hard ceiling on how long callbacks are delivered for a single job.
pub const MAX_JOB_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts job status payloads as JSON.
#[derive(Clone, Default)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn post(&self, url: &str, status: &JobStatus) -> Result<(), Error> {
        let response = self
            .client
            .post(url)
            .timeout(CALLBACK_TIMEOUT)
            .json(status)
            .send()
            .await
            .with_context(|| format!("calling callback URL {url}"))?;

        if !response.status().is_success() {
            bail!("callback URL {} answered {}", url, response.status());
        }
        Ok(())
    }
}

pub(crate) async fn deliver(
    service: TranscodingService,
    job: Job,
    notifier: Notifier,
    cancel_token: CancellationToken,
    deadline: Instant,
) {
    tokio::select! {
        _ = cancel_token.cancelled() => {
            debug!("Callback delivery cancelled");
        },
        _ = sleep_until(deadline) => {
            warn!("Job deadline reached, stopping callback delivery");
        },
        _ = poll(&service, &job, &notifier) => {},
    }
}

async fn poll(service: &TranscodingService, job: &Job, notifier: &Notifier) {
    let interval = Duration::from_secs(u64::from(job.status_callback_interval.max(1)));
    let mut progress: f64 = 0.0;

    loop {
        let mut status = match service.job_status(&job.id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "Failed to query job status");
                sleep(interval).await;
                continue;
            }
        };
        progress = progress.max(status.progress);
        status.progress = progress;

        if let Some(url) = &job.status_callback_url {
            if let Err(err) = notifier.post(url, &status).await {
                warn!(url = %url, error = %err, "Failed to post status callback");
                sleep(interval).await;
                continue;
            }
        }

        if status.status.is_terminal() {
            if let Some(url) = &job.completion_callback_url {
                if let Err(err) = notifier.post(url, &status).await {
                    warn!(url = %url, error = %err, "Failed to post completion callback");
                    sleep(interval).await;
                    continue;
                }
            }
            info!(status = ?status.status, "Job done, callback delivery finished");
            return;
        }

        sleep(interval).await;
    }
}
