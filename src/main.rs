use anyhow::{Context, Error};
use clap::{Parser, Subcommand};

use std::env;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use vtbroker::config::Config;
use vtbroker::db::{DbHandle, MemoryStore, Repository};
use vtbroker::error::ServiceError;
use vtbroker::registry::ProviderRegistry;
use vtbroker::service::{NewJobRequest, OutputRequest, TranscodingService};
use vtbroker::{telemetry, Preset, StreamingParams};

#[derive(Parser, Clone, Debug)]
#[command(author, version)]
pub struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    /// Submit a job and deliver its callbacks until it completes
    Submit {
        #[arg(short = 'p', long, help = "Provider name")]
        provider: String,

        #[arg(short = 's', long, help = "Source media (key or s3:// URI)")]
        source: String,

        #[arg(
            short = 'o',
            long = "output",
            required = true,
            help = "Output as PRESET or PRESET=FILE_NAME, repeatable"
        )]
        outputs: Vec<String>,

        #[arg(long, help = "Adaptive streaming protocol, e.g. hls")]
        protocol: Option<String>,

        #[arg(long, default_value = "0")]
        segment_duration: u32,

        #[arg(long, default_value = "")]
        playlist_file_name: String,

        #[arg(long)]
        status_callback_url: Option<String>,

        #[arg(long)]
        completion_callback_url: Option<String>,

        #[arg(long, default_value = "0", help = "Seconds between status polls")]
        callback_interval: u32,
    },
    /// Print the status of a job
    Status { job_id: String },
    /// Cancel a job
    Cancel { job_id: String },
    /// Describe every registered provider
    Providers,
    /// Manage presets
    #[command(subcommand)]
    Preset(PresetCommand),
}

#[derive(Subcommand, Clone, Debug)]
enum PresetCommand {
    /// Create a preset from a JSON file on the given providers
    Create {
        file: std::path::PathBuf,

        #[arg(short = 'p', long = "provider", required = true)]
        providers: Vec<String>,
    },
    /// Delete a preset everywhere it is mapped
    Delete { preset_id: String },
}

fn output_request(arg: &str) -> OutputRequest {
    match arg.split_once('=') {
        Some((preset, file_name)) => OutputRequest {
            preset: preset.to_string(),
            file_name: Some(file_name.to_string()),
        },
        None => OutputRequest::from(arg),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(err: ServiceError) -> Error {
    anyhow::anyhow!("{} {}", err.status_code(), err.body())
}

#[instrument(skip_all)]
async fn run(cli: Cli, cancel_token: CancellationToken) -> Result<(), Error> {
    let repository: Arc<dyn Repository> = match &cli.config.database_url {
        Some(url) => Arc::new(
            DbHandle::new(url)
                .await
                .context("connecting to the database")?,
        ),
        None => {
            debug!("No database configured, keeping jobs in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let service = TranscodingService::new(
        cli.config,
        ProviderRegistry::builtin(),
        repository,
        cancel_token.clone(),
    );

    match cli.command {
        Command::Submit {
            provider,
            source,
            outputs,
            protocol,
            segment_duration,
            playlist_file_name,
            status_callback_url,
            completion_callback_url,
            callback_interval,
        } => {
            let request = NewJobRequest {
                provider,
                source,
                outputs: outputs.iter().map(String::as_str).map(output_request).collect(),
                streaming_params: protocol.map(|protocol| StreamingParams {
                    protocol,
                    segment_duration,
                    playlist_file_name,
                }),
                status_callback_url,
                status_callback_interval: callback_interval,
                completion_callback_url,
            };
            let job = service.new_job(request).await.map_err(report)?;
            print_json(&job)?;

            if job.has_callbacks() {
                info!(job_id = %job.id, "Delivering callbacks, press Ctrl-C to stop");
            }
            service.wait_for_callbacks().await;
        }
        Command::Status { job_id } => {
            print_json(&service.job_status(&job_id).await.map_err(report)?)?;
        }
        Command::Cancel { job_id } => {
            print_json(&service.cancel_job(&job_id).await.map_err(report)?)?;
        }
        Command::Providers => {
            print_json(&service.describe_providers().await.map_err(report)?)?;
        }
        Command::Preset(PresetCommand::Create { file, providers }) => {
            let body = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let preset: Preset = serde_json::from_str(&body)?;
            let preset = service
                .create_preset(preset, &providers)
                .await
                .map_err(report)?;
            print_json(&preset)?;
        }
        Command::Preset(PresetCommand::Delete { preset_id }) => {
            let failed = service.delete_preset(&preset_id).await.map_err(report)?;
            print_json(&serde_json::json!({ "presetId": preset_id, "failedProviders": failed }))?;
        }
    }

    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "vtbroker=DEBUG");
    }

    let cli = Cli::parse();
    telemetry::init(&cli.config)?;

    let token = CancellationToken::new();

    let cloned_token = token.clone();
    let app = tokio::spawn(run(cli, cloned_token));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {info!("Received SIGTERM"); token.cancel()},
            _ = sigint.recv() => {info!("Received SIGINT"); token.cancel()},
        }
    });
    let result = app.await?;
    telemetry::shutdown();
    result?;

    Ok(())
}
