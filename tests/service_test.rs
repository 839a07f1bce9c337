//! Submission, status and preset workflows against a scripted provider.

mod common;

use common::{preset, request, Harness, FAKE};
use reqwest::StatusCode;
use vtbroker::config::{Config, ElasticTranscoderConfig};
use vtbroker::db::Repository;
use vtbroker::error::ServiceError;
use vtbroker::provider::Status;
use vtbroker::service::OutputRequest;
use vtbroker::StreamingParams;

#[tokio::test]
async fn new_job_persists_job() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut request = request(&["mp4_720p", "hls_480p"]);
    request.outputs[1].file_name = Some("hls/movie_480p.ts".to_string());
    request.streaming_params = Some(StreamingParams {
        protocol: "hls".to_string(),
        segment_duration: 3,
        playlist_file_name: "hls/index.m3u8".to_string(),
    });

    let job = harness.service.new_job(request).await.unwrap();
    assert_eq!(job.provider_name, FAKE);
    assert_eq!(job.provider_job_id, format!("fake-{}", job.id));
    assert_eq!(job.status_callback_interval, vtbroker::DEFAULT_CALLBACK_INTERVAL);
    assert_eq!(job.streaming_params.as_ref().unwrap().segment_duration, 3);
    assert_eq!(harness.store.get_job(&job.id).await.unwrap(), job);

    let transcoded = harness.script.transcoded.lock().unwrap();
    let (submitted, profile) = &transcoded[0];
    assert_eq!(submitted.id, job.id);
    assert_eq!(profile.source_media, "s3://source-bucket/movies/movie.mov");
    assert_eq!(profile.presets.len(), 2);
    assert_eq!(profile.outputs[0].file_name, "movie_mp4_720p.mp4");
    assert_eq!(profile.outputs[0].preset.name, "mp4_720p");
    assert_eq!(profile.outputs[1].file_name, "hls/movie_480p.ts");
    assert_eq!(profile.outputs[1].preset.name, "hls_480p");
}

#[tokio::test]
async fn new_job_drops_streaming_params_without_protocol() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut request = request(&["mp4_720p"]);
    request.streaming_params = Some(StreamingParams::default());

    let job = harness.service.new_job(request).await.unwrap();
    assert!(job.streaming_params.is_none());
}

#[tokio::test]
async fn new_job_rejects_malformed_requests() {
    let harness = Harness::new(&[Status::Queued]).await;

    let mut no_provider = request(&["mp4_720p"]);
    no_provider.provider.clear();
    let mut no_source = request(&["mp4_720p"]);
    no_source.source.clear();
    let no_outputs = request(&[]);

    for request in [no_provider, no_source, no_outputs] {
        let err = harness.service.new_job(request).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn new_job_unknown_preset_is_client_error() {
    let harness = Harness::new(&[Status::Queued]).await;

    let err = harness
        .service
        .new_job(request(&["mp4_720p", "nope"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJob(ref msg) if msg.contains("nope")));
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn new_job_unknown_provider_is_client_error() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut request = request(&["mp4_720p"]);
    request.provider = "zencoder".to_string();

    let err = harness.service.new_job(request).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn new_job_unmapped_preset_is_client_error() {
    let harness = Harness::new(&[Status::Queued]).await;
    harness
        .store
        .create_preset(&preset("webm_720p", "webm", &[("other", "x")]))
        .await
        .unwrap();

    let err = harness
        .service
        .new_job(request(&["webm_720p"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJob(ref msg) if msg.contains("has no mapping")));
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn elastictranscoder_unmapped_preset_is_client_error() {
    let config = Config {
        elastic_transcoder: ElasticTranscoderConfig {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            pipeline_id: "1459300000000-pipeline".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let harness = Harness::with_config(&[Status::Queued], config).await;
    let mut request = request(&["mp4_720p"]);
    request.provider = "elastictranscoder".to_string();

    let err = harness.service.new_job(request).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJob(ref msg) if msg.contains("has no mapping")));
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn elastictranscoder_without_credentials_is_client_error() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut request = request(&["mp4_720p"]);
    request.provider = "elastictranscoder".to_string();

    let err = harness.service.new_job(request).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidJob(ref msg) if msg.contains("config")));
}

#[tokio::test]
async fn job_status_queries_provider() {
    let harness = Harness::new(&[Status::Started]).await;
    let job = harness.service.new_job(request(&["mp4_720p"])).await.unwrap();

    let status = harness.service.job_status(&job.id).await.unwrap();
    assert_eq!(status.job_id, job.id);
    assert_eq!(status.provider_name, FAKE);
    assert_eq!(status.provider_job_id, job.provider_job_id);
    assert_eq!(status.status, Status::Started);
    assert_eq!(status.progress, 50.0);
}

#[tokio::test]
async fn job_status_missing_record_is_not_found() {
    let harness = Harness::new(&[Status::Queued]).await;

    let err = harness.service.job_status("missing").await.unwrap_err();
    assert!(matches!(err, ServiceError::JobNotFound(ref id) if id == "missing"));
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_status_lost_by_provider_is_gone() {
    let harness = Harness::new(&[Status::Queued]).await;
    let job = harness.service.new_job(request(&["mp4_720p"])).await.unwrap();
    *harness.script.lost_job.lock().unwrap() = true;

    let err = harness.service.job_status(&job.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::JobGone { ref job_id, .. } if *job_id == job.id));
    assert_eq!(err.status_code(), StatusCode::GONE);
}

#[tokio::test]
async fn job_status_unregistered_provider_is_server_error() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut job = harness.service.new_job(request(&["mp4_720p"])).await.unwrap();
    job.id = "orphan".to_string();
    job.provider_name = "retired".to_string();
    harness.store.create_job(&job).await.unwrap();

    let err = harness.service.job_status("orphan").await.unwrap_err();
    assert!(matches!(err, ServiceError::Internal(_)));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn cancel_job_reports_canceled_status() {
    let harness = Harness::new(&[Status::Started]).await;
    let job = harness.service.new_job(request(&["mp4_720p"])).await.unwrap();

    let status = harness.service.cancel_job(&job.id).await.unwrap();
    assert_eq!(status.status, Status::Canceled);
    assert_eq!(
        *harness.script.canceled.lock().unwrap(),
        vec![job.provider_job_id.clone()]
    );
}

#[tokio::test]
async fn create_and_delete_preset() {
    let harness = Harness::new(&[Status::Queued]).await;
    let new_preset = preset("webm_1080p", "webm", &[]);

    let created = harness
        .service
        .create_preset(new_preset.clone(), &[FAKE.to_string()])
        .await
        .unwrap();
    assert_eq!(created.provider_id(FAKE), Some("fake-webm_1080p"));
    assert_eq!(harness.store.get_preset("webm_1080p").await.unwrap(), created);

    let err = harness
        .service
        .create_preset(new_preset, &[FAKE.to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

    let failed = harness.service.delete_preset("webm_1080p").await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(
        *harness.script.deleted_presets.lock().unwrap(),
        vec!["fake-webm_1080p".to_string()]
    );
    assert!(harness.store.get_preset("webm_1080p").await.is_err());

    let err = harness.service.delete_preset("webm_1080p").await.unwrap_err();
    assert!(matches!(err, ServiceError::PresetNotFound(_)));
}

#[tokio::test]
async fn delete_preset_reports_failed_providers() {
    let harness = Harness::new(&[Status::Queued]).await;
    harness
        .store
        .create_preset(&preset(
            "mixed",
            "mp4",
            &[(FAKE, "fake-mixed"), ("elastictranscoder", "et-mixed")],
        ))
        .await
        .unwrap();

    // elastictranscoder is not configured, so it cannot be built
    let failed = harness.service.delete_preset("mixed").await.unwrap();
    assert_eq!(failed, vec!["elastictranscoder".to_string()]);
    assert!(harness.store.get_preset("mixed").await.is_err());
}

#[tokio::test]
async fn lists_configured_providers() {
    let harness = Harness::new(&[Status::Queued]).await;
    assert_eq!(harness.service.list_providers(), vec![FAKE.to_string()]);

    let descriptions = harness.service.describe_providers().await.unwrap();
    assert_eq!(descriptions.len(), 2);
    let et = descriptions
        .iter()
        .find(|d| d.name == "elastictranscoder")
        .unwrap();
    assert!(!et.enabled);

    let err = harness.service.describe_provider("nope").await.unwrap_err();
    assert!(matches!(err, ServiceError::ProviderNotFound(_)));
}

#[tokio::test]
async fn output_request_file_name_defaults() {
    let harness = Harness::new(&[Status::Queued]).await;
    let mut request = request(&["mp4_720p"]);
    request.outputs.push(OutputRequest {
        preset: "mp4_720p".to_string(),
        file_name: Some(String::new()),
    });

    harness.service.new_job(request).await.unwrap();
    let transcoded = harness.script.transcoded.lock().unwrap();
    let (_, profile) = &transcoded[0];
    assert_eq!(profile.outputs[1].file_name, "movie_mp4_720p.mp4");
}
