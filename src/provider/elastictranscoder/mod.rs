//! AWS Elastic Transcoder backend.
//!
//! Translates the generic preset and output model into Elastic Transcoder
//! jobs, presets and HLS playlists, and maps its job states back onto
//! [`Status`]. Obtain an instance through the registry under [`NAME`].

use std::path::Path;

use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_elastictranscoder::types::{
    AudioParameters, CreateJobOutput, CreateJobPlaylist, Job as EtJob, Thumbnails,
    VideoParameters,
};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::provider::{
    Capabilities, JobOutput, JobStatus, MediaInfo, OutputFile, ProviderError, Status,
    TranscodeProfile, TranscodingProvider,
};
use crate::{AudioPreset, GopMode, Job, Preset, VideoPreset};

pub mod client;

use client::{ApiError, CreateJobRequest, CreatePresetRequest, ElasticTranscoderApi, SdkClient};

/// Name the provider is registered under.
pub const NAME: &str = "elastictranscoder";

const ADAPTIVE_CONTAINER: &str = "ts";
const PLAYLIST_FORMAT: &str = "HLSv3";
const DEFAULT_PLAYLIST_NAME: &str = "master";

/// Registry factory. Rejects configs without credentials or a pipeline.
pub fn factory(config: &Config) -> Result<Box<dyn TranscodingProvider>, ProviderError> {
    let et = &config.elastic_transcoder;
    if et.access_key_id.is_empty() || et.secret_access_key.is_empty() || et.pipeline_id.is_empty()
    {
        return Err(ProviderError::InvalidConfig(
            "invalid Elastic Transcoder config: access key id, secret access key and pipeline id are required"
                .to_string(),
        ));
    }
    Ok(Box::new(ElasticTranscoderProvider::new(
        Box::new(SdkClient::new(et)),
        et.pipeline_id.clone(),
    )))
}

pub struct ElasticTranscoderProvider {
    client: Box<dyn ElasticTranscoderApi>,
    pipeline_id: String,
}

impl ElasticTranscoderProvider {
    pub fn new(client: Box<dyn ElasticTranscoderApi>, pipeline_id: String) -> Self {
        Self {
            client,
            pipeline_id,
        }
    }

    async fn output_destination(&self, job: &Job, et_job: &EtJob) -> Result<String, ApiError> {
        let pipeline = self
            .client
            .read_pipeline(et_job.pipeline_id().unwrap_or(self.pipeline_id.as_str()))
            .await?;
        Ok(format!(
            "s3://{}/{}",
            pipeline.output_bucket().unwrap_or_default(),
            job.id
        ))
    }

    async fn output_files(&self, et_job: &EtJob) -> Result<Vec<OutputFile>, ApiError> {
        let pipeline = self
            .client
            .read_pipeline(et_job.pipeline_id().unwrap_or(self.pipeline_id.as_str()))
            .await?;
        let bucket = pipeline.output_bucket().unwrap_or_default();
        let prefix = et_job.output_key_prefix().unwrap_or_default();

        let mut files = Vec::with_capacity(et_job.outputs().len());
        for output in et_job.outputs() {
            let preset = self
                .client
                .read_preset(output.preset_id().unwrap_or_default())
                .await?;
            files.push(OutputFile {
                path: format!("s3://{}/{}{}", bucket, prefix, output.key().unwrap_or_default()),
                container: preset.container().unwrap_or_default().to_string(),
                video_codec: preset
                    .video()
                    .and_then(|video| video.codec())
                    .unwrap_or_default()
                    .to_string(),
                width: dimension_value(output.width()),
                height: dimension_value(output.height()),
            });
        }
        Ok(files)
    }
}

#[async_trait]
impl TranscodingProvider for ElasticTranscoderProvider {
    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn transcode(
        &self,
        job: &Job,
        profile: &TranscodeProfile,
    ) -> Result<JobStatus, ProviderError> {
        // every output must be mapped before anything is sent to the backend
        let preset_ids = profile
            .outputs
            .iter()
            .map(|output| {
                output
                    .preset
                    .provider_id(NAME)
                    .ok_or_else(|| ProviderError::PresetMapNotFound {
                        preset: output.preset.name.clone(),
                        provider: NAME.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let segment_duration = profile
            .streaming_params
            .as_ref()
            .filter(|params| params.segment_duration > 0)
            .map(|params| params.segment_duration.to_string());

        let mut outputs = Vec::with_capacity(profile.outputs.len());
        let mut adaptive_keys = Vec::new();
        for (output, preset_id) in profile.outputs.iter().zip(preset_ids) {
            let preset = self
                .client
                .read_preset(preset_id)
                .await
                .map_err(|err| match err {
                    ApiError::NotFound(_) => ProviderError::PresetNotFound(preset_id.to_string()),
                    ApiError::Other(err) => ProviderError::Backend(err),
                })?;
            let container = preset
                .container()
                .ok_or_else(|| anyhow!("misconfigured preset: {preset_id}"))?;

            let adaptive = container == ADAPTIVE_CONTAINER;
            let key = output_key(&job.id, &output.file_name, adaptive);
            let mut builder = CreateJobOutput::builder()
                .key(key.clone())
                .preset_id(preset_id);
            if adaptive {
                adaptive_keys.push(key);
                builder = builder.set_segment_duration(segment_duration.clone());
            }
            outputs.push(builder.build());
        }

        let mut playlists = Vec::new();
        if !adaptive_keys.is_empty() {
            let playlist_name = profile
                .streaming_params
                .as_ref()
                .map(|params| params.playlist_file_name.as_str())
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_PLAYLIST_NAME);
            playlists.push(
                CreateJobPlaylist::builder()
                    .format(PLAYLIST_FORMAT)
                    .name(format!("{}/{}", job.id, strip_extension(playlist_name)))
                    .set_output_keys(Some(adaptive_keys))
                    .build(),
            );
        }

        let request = CreateJobRequest {
            pipeline_id: self.pipeline_id.clone(),
            input_key: normalize_source(&profile.source_media).to_string(),
            outputs,
            playlists,
        };
        let created = self
            .client
            .create_job(request)
            .await
            .map_err(|err| anyhow::Error::new(err).context("creating Elastic Transcoder job"))?;
        let provider_job_id = created
            .id()
            .ok_or_else(|| anyhow!("Elastic Transcoder returned a job without id"))?;
        debug!(provider_job_id, "Submitted job");

        Ok(JobStatus::queued(NAME, provider_job_id))
    }

    #[instrument(skip_all, fields(job_id = %job.id, provider_job_id = %job.provider_job_id))]
    async fn job_status(&self, job: &Job) -> Result<JobStatus, ProviderError> {
        let et_job = self
            .client
            .read_job(&job.provider_job_id)
            .await
            .map_err(|err| match err {
                ApiError::NotFound(_) => ProviderError::JobNotFound(job.provider_job_id.clone()),
                ApiError::Other(err) => ProviderError::Backend(err),
            })?;

        let total = et_job.outputs().len();
        let mut completed = 0;
        let mut details = serde_json::Map::with_capacity(total);
        for output in et_job.outputs() {
            if status_map(output.status().unwrap_or_default()).is_terminal() {
                completed += 1;
            }
            details.insert(
                output.key().unwrap_or_default().to_string(),
                json!(output.status_detail().unwrap_or_default()),
            );
        }
        let progress = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        let destination = match self.output_destination(job, &et_job).await {
            Ok(destination) => destination,
            Err(err) => {
                warn!(error = %err, "Failed to resolve output destination");
                err.to_string()
            }
        };
        let files = self
            .output_files(&et_job)
            .await
            .map_err(|err| anyhow::Error::new(err).context("resolving output files"))?;

        let detected = et_job.input().and_then(|input| input.detected_properties());
        let media_info = MediaInfo {
            duration: std::time::Duration::from_millis(
                detected
                    .and_then(|props| props.duration_millis())
                    .and_then(|millis| u64::try_from(millis).ok())
                    .unwrap_or_default(),
            ),
            width: dimension_value(detected.and_then(|props| props.width())),
            height: dimension_value(detected.and_then(|props| props.height())),
        };

        Ok(JobStatus {
            job_id: String::new(),
            provider_name: NAME.to_string(),
            provider_job_id: et_job.id().unwrap_or(job.provider_job_id.as_str()).to_string(),
            status: status_map(et_job.status().unwrap_or_default()),
            progress,
            provider_status: json!({ "outputs": details }),
            media_info,
            output: JobOutput { destination, files },
        })
    }

    async fn create_preset(&self, preset: &Preset) -> Result<String, ProviderError> {
        let container = if preset.container == "m3u8" {
            ADAPTIVE_CONTAINER.to_string()
        } else {
            preset.container.clone()
        };
        let request = CreatePresetRequest {
            name: preset.name.clone(),
            description: preset.description.clone(),
            container,
            video: video_parameters(&preset.video),
            audio: audio_parameters(&preset.audio),
            thumbnails: thumbnails(),
        };
        let created = self
            .client
            .create_preset(request)
            .await
            .map_err(|err| anyhow::Error::new(err).context("creating Elastic Transcoder preset"))?;
        created
            .id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Elastic Transcoder returned a preset without id").into())
    }

    async fn delete_preset(&self, preset_id: &str) -> Result<(), ProviderError> {
        self.client
            .delete_preset(preset_id)
            .await
            .map_err(|err| match err {
                ApiError::NotFound(_) => ProviderError::PresetNotFound(preset_id.to_string()),
                ApiError::Other(err) => ProviderError::Backend(err),
            })
    }

    async fn cancel_job(&self, provider_job_id: &str) -> Result<(), ProviderError> {
        self.client
            .cancel_job(provider_job_id)
            .await
            .map_err(|err| match err {
                ApiError::NotFound(_) => ProviderError::JobNotFound(provider_job_id.to_string()),
                ApiError::Other(err) => ProviderError::Backend(err),
            })
    }

    async fn healthcheck(&self) -> Result<(), ProviderError> {
        self.client
            .read_pipeline(&self.pipeline_id)
            .await
            .map(|_| ())
            .map_err(|err| anyhow::Error::new(err).context("reading pipeline").into())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            input_formats: vec!["h264".to_string()],
            output_formats: vec!["mp4".to_string(), "hls".to_string(), "webm".to_string()],
            destinations: vec!["s3".to_string()],
        }
    }
}

/// Strips an `s3://bucket/` prefix, leaving only the object key.
fn normalize_source(source: &str) -> &str {
    match source.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map_or(rest, |(_, key)| key),
        None => source,
    }
}

fn output_key(job_id: &str, file_name: &str, adaptive: bool) -> String {
    let file_name = if adaptive {
        strip_extension(file_name)
    } else {
        file_name
    };
    format!("{job_id}/{file_name}")
}

fn strip_extension(file_name: &str) -> &str {
    match Path::new(file_name).extension() {
        Some(ext) => &file_name[..file_name.len() - ext.len() - 1],
        None => file_name,
    }
}

fn status_map(status: &str) -> Status {
    match status {
        "Submitted" => Status::Queued,
        "Progressing" => Status::Started,
        "Complete" => Status::Finished,
        "Canceled" => Status::Canceled,
        _ => Status::Failed,
    }
}

fn dimension_value(value: Option<i32>) -> u32 {
    value
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or_default()
}

fn dimension(value: Option<u32>) -> String {
    value.map_or_else(|| "auto".to_string(), |value| value.to_string())
}

fn video_codec(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "h264" | "h.264" | "avc" => "H.264".to_string(),
        "vp8" => "vp8".to_string(),
        "vp9" => "vp9".to_string(),
        "mpeg2" => "mpeg2".to_string(),
        "gif" => "gif".to_string(),
        _ => codec.to_string(),
    }
}

fn audio_codec(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "aac" => "AAC".to_string(),
        "vorbis" => "vorbis".to_string(),
        "mp3" => "mp3".to_string(),
        "flac" => "flac".to_string(),
        "pcm" => "pcm".to_string(),
        _ => codec.to_string(),
    }
}

fn video_parameters(video: &VideoPreset) -> VideoParameters {
    let codec = video_codec(&video.codec);
    let mut builder = VideoParameters::builder()
        .codec(codec.clone())
        .max_width(dimension(video.width))
        .max_height(dimension(video.height))
        .display_aspect_ratio("auto")
        .frame_rate("auto")
        .sizing_policy("Fill")
        .padding_policy("Pad")
        // bits to kilobits, truncating
        .bit_rate((video.bitrate / 1000).to_string())
        .fixed_gop(if video.gop_mode == GopMode::Fixed {
            "true"
        } else {
            "false"
        });
    if let Some(gop_size) = video.gop_size {
        builder = builder.keyframes_max_dist(gop_size.to_string());
    }
    match codec.as_str() {
        "H.264" => {
            builder = builder
                .codec_options("Profile", video.profile.to_lowercase())
                .codec_options("Level", video.profile_level.clone())
                .codec_options("MaxReferenceFrames", "2");
        }
        "vp8" | "vp9" if !video.profile.is_empty() => {
            builder = builder.codec_options("Profile", video.profile.clone());
        }
        _ => {}
    }
    builder.build()
}

fn audio_parameters(audio: &AudioPreset) -> AudioParameters {
    AudioParameters::builder()
        .codec(audio_codec(&audio.codec))
        .bit_rate((audio.bitrate / 1000).to_string())
        .channels("auto")
        .sample_rate("auto")
        .build()
}

fn thumbnails() -> Thumbnails {
    Thumbnails::builder()
        .format("png")
        .interval("1")
        .max_width("auto")
        .max_height("auto")
        .sizing_policy("Fill")
        .padding_policy("Pad")
        .build()
}
