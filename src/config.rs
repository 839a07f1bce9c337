use clap::Args;

#[derive(Args, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[arg(
        long = "database-url",
        env = "DATABASE_URL",
        help = "PostgreSQL Connection URL (jobs are kept in memory when unset)"
    )]
    pub database_url: Option<String>,

    #[arg(
        long = "jaeger-endpoint",
        env = "JAEGER_ENDPOINT",
        help = "Jaeger collector endpoint for trace export"
    )]
    pub jaeger_endpoint: Option<String>,

    #[command(flatten)]
    pub elastic_transcoder: ElasticTranscoderConfig,
}

#[derive(Args, Clone, Debug, Default, PartialEq)]
pub struct ElasticTranscoderConfig {
    #[arg(long = "aws-access-key-id", env = "AWS_ACCESS_KEY_ID", default_value = "")]
    pub access_key_id: String,

    #[arg(
        long = "aws-secret-access-key",
        env = "AWS_SECRET_ACCESS_KEY",
        default_value = "",
        hide_env_values = true
    )]
    pub secret_access_key: String,

    #[arg(
        long = "aws-region",
        env = "AWS_REGION",
        default_value = "",
        help = "AWS region (us-east-1 when empty)"
    )]
    pub region: String,

    #[arg(
        long = "elastictranscoder-pipeline-id",
        env = "ELASTICTRANSCODER_PIPELINE_ID",
        default_value = ""
    )]
    pub pipeline_id: String,

    #[arg(
        long = "elastictranscoder-endpoint",
        env = "ELASTICTRANSCODER_ENDPOINT",
        help = "Override the Elastic Transcoder API endpoint"
    )]
    pub endpoint: Option<String>,
}
