use crate::{Queue, Result};
use chrono::{DateTime, Duration, Utc};
use queuectl_core::{ExecutionOutcome, Job, RetryPolicy, Transition};
use tracing::{info, warn};

impl Queue {
    /// Record the outcome of one attempt on a job claimed by `worker_id`
    pub async fn complete_attempt(
        &self,
        job: &Job,
        worker_id: &str,
        outcome: &ExecutionOutcome,
        policy: &RetryPolicy,
    ) -> Result<Transition> {
        self.complete_attempt_at(job, worker_id, outcome, policy, Utc::now())
            .await
    }

    pub async fn complete_attempt_at(
        &self,
        job: &Job,
        worker_id: &str,
        outcome: &ExecutionOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let transition = policy.decide(job, outcome, now);

        self.store
            .apply_transition(&job.id, worker_id, &transition, now)
            .await?;

        match &transition {
            Transition::Completed => info!("Job {} completed", job.id),
            Transition::Retry {
                attempts, run_after, ..
            } => info!(
                "Job {} failed (attempt {}/{}), retrying after {}",
                job.id, attempts, job.max_retries, run_after
            ),
            Transition::Dead { attempts, .. } => warn!(
                "Job {} failed (attempt {}/{}), moved to DLQ",
                job.id, attempts, job.max_retries
            ),
        }

        Ok(transition)
    }

    /// Return jobs whose claim is older than `older_than` to pending.
    /// Attempts are not charged for the abandoned run.
    pub async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let now = Utc::now();
        let released = self.store.release_stale(now - older_than, now).await?;
        if released > 0 {
            warn!("Released {} stale job claim(s) older than {}s", released, older_than.num_seconds());
        }
        Ok(released)
    }
}
