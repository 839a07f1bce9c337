use crate::{Job, Preset, StreamingParams};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Executor;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("job {0:?} not found")]
    JobNotFound(String),

    #[error("preset {0:?} not found")]
    PresetNotFound(String),

    #[error("preset {0:?} already exists")]
    PresetAlreadyExists(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Job and preset storage.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), DbError>;

    async fn get_job(&self, id: &str) -> Result<Job, DbError>;

    async fn create_preset(&self, preset: &Preset) -> Result<(), DbError>;

    async fn get_preset(&self, id: &str) -> Result<Preset, DbError>;

    async fn delete_preset(&self, id: &str) -> Result<(), DbError>;
}

#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<PgPool>,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    provider_name: String,
    provider_job_id: String,
    status_callback_url: Option<String>,
    status_callback_interval: i32,
    completion_callback_url: Option<String>,
    streaming_params: Option<Json<StreamingParams>>,
    created_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            provider_name: row.provider_name,
            provider_job_id: row.provider_job_id,
            status_callback_url: row.status_callback_url,
            status_callback_interval: u32::try_from(row.status_callback_interval)
                .unwrap_or_default(),
            completion_callback_url: row.completion_callback_url,
            streaming_params: row.streaming_params.map(|params| params.0),
            created_at: row.created_at,
        }
    }
}

impl DbHandle {
    pub async fn new(url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

        (&pool).execute(include_str!("setup.sql")).await?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Repository for DbHandle {
    async fn create_job(&self, job: &Job) -> Result<(), DbError> {
        debug!(job_id = %job.id, "Persisting job");
        sqlx::query(
            "INSERT INTO jobs \
            (id, provider_name, provider_job_id, status_callback_url, \
            status_callback_interval, completion_callback_url, streaming_params, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&job.id)
        .bind(&job.provider_name)
        .bind(&job.provider_job_id)
        .bind(&job.status_callback_url)
        .bind(i32::try_from(job.status_callback_interval).unwrap_or(i32::MAX))
        .bind(&job.completion_callback_url)
        .bind(job.streaming_params.as_ref().map(Json))
        .bind(job.created_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, DbError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, provider_name, provider_job_id, status_callback_url, \
            status_callback_interval, completion_callback_url, streaming_params, created_at \
            FROM jobs \
            WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        row.map(Job::from)
            .ok_or_else(|| DbError::JobNotFound(id.to_string()))
    }

    async fn create_preset(&self, preset: &Preset) -> Result<(), DbError> {
        debug!(preset = %preset.name, "Persisting preset");
        let result = sqlx::query(
            "INSERT INTO presets (id, body) VALUES ($1, $2) \
            ON CONFLICT (id) DO NOTHING",
        )
        .bind(&preset.name)
        .bind(Json(preset))
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::PresetAlreadyExists(preset.name.clone()));
        }
        Ok(())
    }

    async fn get_preset(&self, id: &str) -> Result<Preset, DbError> {
        let body = sqlx::query_scalar::<_, Json<Preset>>("SELECT body FROM presets WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        body.map(|body| body.0)
            .ok_or_else(|| DbError::PresetNotFound(id.to_string()))
    }

    async fn delete_preset(&self, id: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM presets WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::PresetNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<DashMap<String, Job>>,
    presets: Arc<DashMap<String, Preset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<(), DbError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, DbError> {
        self.jobs
            .get(id)
            .map(|job| job.clone())
            .ok_or_else(|| DbError::JobNotFound(id.to_string()))
    }

    async fn create_preset(&self, preset: &Preset) -> Result<(), DbError> {
        match self.presets.entry(preset.name.clone()) {
            Entry::Occupied(_) => Err(DbError::PresetAlreadyExists(preset.name.clone())),
            Entry::Vacant(entry) => {
                entry.insert(preset.clone());
                Ok(())
            }
        }
    }

    async fn get_preset(&self, id: &str) -> Result<Preset, DbError> {
        self.presets
            .get(id)
            .map(|preset| preset.clone())
            .ok_or_else(|| DbError::PresetNotFound(id.to_string()))
    }

    async fn delete_preset(&self, id: &str) -> Result<(), DbError> {
        self.presets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DbError::PresetNotFound(id.to_string()))
    }
}
