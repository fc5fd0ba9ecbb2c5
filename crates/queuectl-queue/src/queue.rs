use crate::{QueueError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use queuectl_core::{parse_run_at, Job, JobState, NewJob, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES};
use queuectl_persistence::{
    connect, ConfigStore, JobStore, KEY_BACKOFF_BASE, KEY_MAX_RETRIES, KEY_WORKER_PIDS,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Enqueue input as submitted by callers (usually JSON)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// ISO-8601 time before which the job must not run
    #[serde(default)]
    pub run_at: Option<String>,
}

impl EnqueueRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        EnqueueRequest {
            id: Some(id.into()),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_run_at(mut self, run_at: impl Into<String>) -> Self {
        self.run_at = Some(run_at.into());
        self
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| QueueError::Validation(format!("invalid JSON: {}", e)))
    }
}

/// Aggregate view of the queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Count per state; every state is present
    pub state_counts: BTreeMap<JobState, u64>,
    pub total: u64,
    /// Worker identifiers recorded by the launcher
    pub workers: Vec<String>,
}

/// Queue API over the shared job store
#[derive(Clone)]
pub struct Queue {
    pub(crate) store: JobStore,
    config: ConfigStore,
}

impl Queue {
    pub fn new(pool: SqlitePool) -> Self {
        Queue {
            store: JobStore::new(pool.clone()),
            config: ConfigStore::new(pool),
        }
    }

    /// Open the database at `path`, creating the schema if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connect(path).await?;
        Ok(Queue::new(pool))
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Enqueue a new pending job
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        self.enqueue_at(request, Utc::now()).await
    }

    pub async fn enqueue_at(&self, request: EnqueueRequest, now: DateTime<Utc>) -> Result<Job> {
        // Stored timestamps keep microseconds
        let now = now.trunc_subsecs(6);

        let (id, command) = match (request.id, request.command) {
            (Some(id), Some(command)) => (id, command),
            _ => {
                return Err(QueueError::Validation(
                    "job must contain 'id' and 'command' fields".to_string(),
                ))
            }
        };

        let max_retries = match request.max_retries {
            Some(max_retries) => max_retries,
            None => self.config.get_u32(KEY_MAX_RETRIES, DEFAULT_MAX_RETRIES).await?,
        };

        let run_after = match request.run_at.as_deref() {
            Some(raw) => parse_run_at(raw).unwrap_or_else(|| {
                warn!("Job {}: unparsable run_at {:?}, scheduling immediately", id, raw);
                0
            }),
            None => 0,
        };

        let job = NewJob::builder(id, command)
            .max_retries(max_retries)
            .run_after(run_after)
            .build()?
            .into_job(now);

        self.store.insert(&job).await?;

        info!("Enqueued job {} (max_retries: {}, run_after: {})", job.id, job.max_retries, job.run_after);
        Ok(job)
    }

    /// All jobs, or those in `state`, newest first
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        Ok(self.store.list(state).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.store.select_by_id(id).await?)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let mut state_counts = self.store.select_grouped_counts_by_state().await?;
        for state in JobState::ALL {
            state_counts.entry(state).or_insert(0);
        }
        let total = state_counts.values().sum();
        let workers = self.config.get_list(KEY_WORKER_PIDS).await?;

        Ok(QueueStatus {
            state_counts,
            total,
            workers,
        })
    }

    /// Jobs in the dead letter queue, newest first
    pub async fn list_dlq(&self) -> Result<Vec<Job>> {
        self.list(Some(JobState::Dead)).await
    }

    /// Move a dead job back to pending with a fresh retry budget
    pub async fn retry_dlq_job(&self, id: &str) -> Result<Job> {
        let changed = self.store.mark_retried_from_dlq(id, Utc::now()).await?;

        if changed == 0 {
            return match self.store.select_by_id(id).await? {
                None => Err(QueueError::NotFound { id: id.to_string() }),
                Some(job) => Err(QueueError::InvalidState {
                    id: id.to_string(),
                    actual: job.state,
                }),
            };
        }

        let job = self
            .store
            .select_by_id(id)
            .await?
            .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;

        info!("Job {} moved from DLQ back to pending", id);
        Ok(job)
    }

    /// Retry policy from the persisted `backoff_base`, falling back to the
    /// default when the stored value is unusable
    pub async fn retry_policy(&self) -> Result<RetryPolicy> {
        let base = self.config.get_f64(KEY_BACKOFF_BASE, DEFAULT_BACKOFF_BASE).await?;
        Ok(RetryPolicy::new(base).unwrap_or_else(|e| {
            warn!("{}; using {}", e, DEFAULT_BACKOFF_BASE);
            RetryPolicy::default()
        }))
    }
}
