use crate::{PersistenceError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use queuectl_core::{Job, JobState, Transition};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, \
                           locked_by, locked_at, last_error, run_after";

/// Durable job table backed by SQLite.
///
/// Every method is a single statement, so each write commits or rolls back
/// as one unit. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        JobStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new job row. A duplicate id is reported as `DuplicateId`.
    pub async fn insert(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries,
                              created_at, updated_at, locked_by, locked_at,
                              last_error, run_after)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_retries))
        .bind(format_ts(&job.created_at))
        .bind(format_ts(&job.updated_at))
        .bind(&job.locked_by)
        .bind(job.locked_at.as_ref().map(format_ts))
        .bind(&job.last_error)
        .bind(job.run_after)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Inserted job {}", job.id);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PersistenceError::DuplicateId(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn select_by_id(&self, id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode_job).transpose()
    }

    /// All jobs (optionally of one state), newest first
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? \
                     ORDER BY created_at DESC, rowid DESC"
                );
                sqlx::query(&sql)
                    .bind(state.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC");
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(decode_job).collect()
    }

    /// Id of the oldest pending job due at `now_ts`. Only a hint: the row may
    /// be claimed by someone else before the caller acts on it.
    pub async fn select_eligible_pending_oldest(&self, now_ts: i64) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM jobs
            WHERE state = 'pending' AND run_after <= ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(now_ts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    /// pending -> processing, only if the row is still pending. Returns the
    /// number of rows changed (0 or 1).
    pub async fn conditional_update_to_processing(
        &self,
        id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let now = format_ts(&now);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing',
                locked_by = ?,
                locked_at = ?,
                updated_at = ?
            WHERE id = ? AND state = 'pending'
            "#,
        )
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Job counts grouped by state. States with no jobs are absent.
    pub async fn select_grouped_counts_by_state(&self) -> Result<BTreeMap<JobState, u64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let state: String = get(row, "state")?;
            let count: i64 = get(row, "count")?;
            let state = JobState::parse(&state).map_err(|e| decode_err("state", e))?;
            counts.insert(state, u64::try_from(count).unwrap_or(0));
        }

        Ok(counts)
    }

    /// processing -> completed. Attempts and `last_error` are left as they are.
    pub async fn mark_completed(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                updated_at = ?,
                locked_by = NULL,
                locked_at = NULL
            WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(format_ts(&now))
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        ensure_owned(result.rows_affected(), id, worker_id)
    }

    /// processing -> pending with a new attempt count and backoff deadline
    pub async fn mark_retrying(
        &self,
        id: &str,
        worker_id: &str,
        attempts: u32,
        run_after: i64,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = ?,
                run_after = ?,
                last_error = ?,
                updated_at = ?,
                locked_by = NULL,
                locked_at = NULL
            WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(run_after)
        .bind(last_error)
        .bind(format_ts(&now))
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        ensure_owned(result.rows_affected(), id, worker_id)
    }

    /// processing -> dead
    pub async fn mark_dead(
        &self,
        id: &str,
        worker_id: &str,
        attempts: u32,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dead',
                attempts = ?,
                last_error = ?,
                updated_at = ?,
                locked_by = NULL,
                locked_at = NULL
            WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(last_error)
        .bind(format_ts(&now))
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        ensure_owned(result.rows_affected(), id, worker_id)
    }

    /// Apply a policy decision through the matching transition function
    pub async fn apply_transition(
        &self,
        id: &str,
        worker_id: &str,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match transition {
            Transition::Completed => self.mark_completed(id, worker_id, now).await,
            Transition::Retry {
                attempts,
                run_after,
                last_error,
            } => {
                self.mark_retrying(id, worker_id, *attempts, *run_after, last_error, now)
                    .await
            }
            Transition::Dead {
                attempts,
                last_error,
            } => self.mark_dead(id, worker_id, *attempts, last_error, now).await,
        }
    }

    /// dead -> pending with attempts and `run_after` reset. Returns the
    /// number of rows changed; 0 means the job is missing or not dead.
    pub async fn mark_retried_from_dlq(&self, id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                run_after = 0,
                updated_at = ?,
                locked_by = NULL,
                locked_at = NULL
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(format_ts(&now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Return processing jobs locked before `locked_before` to pending.
    /// Attempts are not charged. Returns the number of jobs released.
    pub async fn release_stale(&self, locked_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                updated_at = ?,
                locked_by = NULL,
                locked_at = NULL
            WHERE state = 'processing' AND locked_at < ?
            "#,
        )
        .bind(format_ts(&now))
        .bind(format_ts(&locked_before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn ensure_owned(rows_affected: u64, id: &str, worker_id: &str) -> Result<()> {
    if rows_affected == 0 {
        warn!("Job {} was not held by worker {} at write time", id, worker_id);
        return Err(PersistenceError::LostOwnership {
            id: id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }
    debug!("Updated job {} for worker {}", id, worker_id);
    Ok(())
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| decode_err(column, e))
}

fn decode_err(column: &'static str, reason: impl ToString) -> PersistenceError {
    PersistenceError::Decode {
        column,
        reason: reason.to_string(),
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &'static str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| decode_err(column, e))
}

fn get_u32(row: &SqliteRow, column: &'static str) -> Result<u32> {
    let value: i64 = get(row, column)?;
    u32::try_from(value).map_err(|e| decode_err(column, e))
}

/// Decode a `jobs` row, failing on missing columns, wrong types, unknown
/// states, or lock fields that disagree with the state.
pub(crate) fn decode_job(row: &SqliteRow) -> Result<Job> {
    let state: String = get(row, "state")?;
    let state = JobState::parse(&state).map_err(|e| decode_err("state", e))?;

    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;
    let locked_at: Option<String> = get(row, "locked_at")?;

    let job = Job {
        id: get(row, "id")?,
        command: get(row, "command")?,
        state,
        attempts: get_u32(row, "attempts")?,
        max_retries: get_u32(row, "max_retries")?,
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
        locked_by: get(row, "locked_by")?,
        locked_at: locked_at
            .as_deref()
            .map(|raw| parse_ts("locked_at", raw))
            .transpose()?,
        last_error: get(row, "last_error")?,
        run_after: get(row, "run_after")?,
    };

    let locked = job.locked_by.is_some() && job.locked_at.is_some();
    let unlocked = job.locked_by.is_none() && job.locked_at.is_none();
    if (state.is_locked() && !locked) || (!state.is_locked() && !unlocked) {
        return Err(decode_err(
            "locked_by",
            format!("job {} is {} but its lock fields disagree", job.id, state),
        ));
    }

    Ok(job)
}
