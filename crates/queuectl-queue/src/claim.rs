use crate::{Queue, Result};
use chrono::{DateTime, Utc};
use queuectl_core::Job;
use tracing::debug;

impl Queue {
    /// Claim the oldest due pending job for `worker_id`, if any
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>> {
        self.claim_at(worker_id, Utc::now()).await
    }

    /// Claim with an explicit clock.
    ///
    /// The selection is only a hint; the conditional update decides. If
    /// another worker wins the race this returns `None` without retrying,
    /// and the caller picks up work on its next poll.
    pub async fn claim_at(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let Some(id) = self.store.select_eligible_pending_oldest(now.timestamp()).await? else {
            return Ok(None);
        };

        let changed = self
            .store
            .conditional_update_to_processing(&id, worker_id, now)
            .await?;

        if changed == 0 {
            debug!("Worker {} lost the claim race for job {}", worker_id, id);
            return Ok(None);
        }

        let job = self.store.select_by_id(&id).await?;
        if let Some(job) = &job {
            debug!("Worker {} claimed job {} (attempt {})", worker_id, job.id, job.attempts + 1);
        }
        Ok(job)
    }
}
