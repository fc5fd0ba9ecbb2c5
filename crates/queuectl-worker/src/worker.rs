use crate::{config::WorkerConfig, executor::{CommandRunner, JobExecutor}};
use queuectl_core::{RetryPolicy, Transition};
use queuectl_queue::{Queue, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Claiming and executing jobs
    Running,
    /// Shutdown requested; no further claims
    Draining,
    Stopped,
}

/// Totals for one run of the worker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Single-job-at-a-time worker over a shared queue
pub struct Worker {
    worker_id: String,
    queue: Queue,
    executor: JobExecutor,
    policy: RetryPolicy,
    config: WorkerConfig,
    shutdown: CancellationToken,
    state: WorkerState,
    summary: WorkerSummary,
}

impl Worker {
    pub fn new(
        queue: Queue,
        runner: Arc<dyn CommandRunner>,
        policy: RetryPolicy,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let worker_id = config.generate_worker_id();
        let executor = JobExecutor::new(runner, config.execution_timeout());

        Worker {
            worker_id,
            queue,
            executor,
            policy,
            config,
            shutdown,
            state: WorkerState::Running,
            summary: WorkerSummary::default(),
        }
    }

    /// Worker with the policy from `config.backoff_base`, or the persisted
    /// one when no override is set
    pub async fn with_queue_policy(
        queue: Queue,
        runner: Arc<dyn CommandRunner>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let policy = match config.backoff_base {
            Some(base) => RetryPolicy::new(base)?,
            None => queue.retry_policy().await?,
        };
        Ok(Worker::new(queue, runner, policy, config, shutdown))
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn summary(&self) -> WorkerSummary {
        self.summary
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// A job that has been claimed always runs to its recorded outcome; the
    /// token is only checked between jobs and while idle.
    pub async fn run(&mut self) -> WorkerSummary {
        info!(
            "Worker {} started (backoff base: {}, timeout: {:?})",
            self.worker_id,
            self.policy.backoff_base(),
            self.config.execution_timeout()
        );

        while self.state == WorkerState::Running {
            if self.shutdown.is_cancelled() {
                self.state = WorkerState::Draining;
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => self.pause(self.config.poll_interval()).await,
                Err(e) => {
                    error!("Worker {} iteration failed: {}", self.worker_id, e);
                    self.pause(self.config.error_backoff()).await;
                }
            }
        }

        self.state = WorkerState::Stopped;
        info!(
            "Worker {} stopped gracefully ({} processed, {} succeeded, {} failed)",
            self.worker_id, self.summary.processed, self.summary.succeeded, self.summary.failed
        );
        self.summary
    }

    /// Claim, execute and record at most one job.
    /// Returns `None` when nothing was claimable.
    pub async fn run_once(&mut self) -> Result<Option<Transition>> {
        let Some(job) = self.queue.claim(&self.worker_id).await? else {
            return Ok(None);
        };

        let outcome = self.executor.execute(&job).await;
        let transition = self
            .queue
            .complete_attempt(&job, &self.worker_id, &outcome, &self.policy)
            .await?;

        self.summary.processed += 1;
        if outcome.is_success() {
            self.summary.succeeded += 1;
        } else {
            self.summary.failed += 1;
        }

        debug!("Worker {}: job {} -> {}", self.worker_id, job.id, transition.label());
        Ok(Some(transition))
    }

    /// Sleep, waking early on shutdown
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
