use crate::{JobError, Result, DEFAULT_MAX_RETRIES};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-assigned job identifier
pub type JobId = String;

/// Job state in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed once `run_after` has passed
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Command exited successfully
    Completed,
    /// Retry budget exhausted; only a DLQ retry brings it back
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(JobError::UnknownState(other.to_string())),
        }
    }

    /// Whether a worker currently owns the job
    pub fn is_locked(&self) -> bool {
        matches!(self, JobState::Processing)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one shell command with its retry bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Opaque shell command, passed verbatim to the runner
    pub command: String,

    pub state: JobState,

    /// Completed execution attempts
    pub attempts: u32,

    /// Attempt ceiling
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Worker holding the claim (set only while processing)
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,

    /// Most recent failure output, at most 1000 characters
    pub last_error: Option<String>,

    /// Unix timestamp before which the job is not claimable
    pub run_after: i64,
}

impl Job {
    /// Check if the job can be claimed at the given Unix time
    pub fn is_claimable_at(&self, now_ts: i64) -> bool {
        self.state == JobState::Pending && self.run_after <= now_ts
    }

    /// Attempts left before the job is dead-lettered
    pub fn remaining_attempts(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempts)
    }
}

/// A validated enqueue request
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: JobId,
    pub command: String,
    pub max_retries: u32,
    pub run_after: i64,
}

impl NewJob {
    pub fn builder(id: impl Into<String>, command: impl Into<String>) -> NewJobBuilder {
        NewJobBuilder::new(id.into(), command.into())
    }

    /// Materialize the pending row written by enqueue
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: self.id,
            command: self.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: self.max_retries,
            created_at: now,
            updated_at: now,
            locked_by: None,
            locked_at: None,
            last_error: None,
            run_after: self.run_after,
        }
    }
}

/// Builder for enqueue requests
pub struct NewJobBuilder {
    id: String,
    command: String,
    max_retries: u32,
    run_after: i64,
}

impl NewJobBuilder {
    pub fn new(id: String, command: String) -> Self {
        NewJobBuilder {
            id,
            command,
            max_retries: DEFAULT_MAX_RETRIES,
            run_after: 0,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn run_after(mut self, run_after: i64) -> Self {
        self.run_after = run_after;
        self
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_after = run_at.timestamp();
        self
    }

    pub fn build(self) -> Result<NewJob> {
        if self.id.trim().is_empty() {
            return Err(JobError::Validation(
                "job must contain a non-empty 'id' field".to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(JobError::Validation(format!(
                "job {} must contain a non-empty 'command' field",
                self.id
            )));
        }
        if self.max_retries == 0 {
            return Err(JobError::Validation(format!(
                "job {} must allow at least one attempt (max_retries = 0)",
                self.id
            )));
        }

        Ok(NewJob {
            id: self.id,
            command: self.command,
            max_retries: self.max_retries,
            run_after: self.run_after.max(0),
        })
    }
}

const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: [&str; 2] = ["%:z", "%z"];

/// Parse an ISO-8601 `run_at` value into a Unix timestamp.
///
/// Accepts a date and time (seconds and fraction optional, `T` or space
/// separated) with `Z`, `+hh:mm` or `+hhmm`, or no offset, which is read as
/// UTC. A bare date means midnight UTC. Returns `None` when nothing matches.
pub fn parse_run_at(raw: &str) -> Option<i64> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }

    let zoned = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(rest) => format!("{}+00:00", rest),
        None => raw.to_string(),
    };

    for fmt in DATE_TIME_FORMATS {
        for offset in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(&zoned, &format!("{}{}", fmt, offset)) {
                return Some(dt.timestamp());
            }
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_job_defaults() {
        let new_job = NewJob::builder("job1", "echo hello").build().unwrap();

        assert_eq!(new_job.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(new_job.run_after, 0);

        let now = Utc::now();
        let job = new_job.into_job(now);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.created_at, now);
        assert_eq!(job.updated_at, now);
        assert!(job.locked_by.is_none());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_builder_rejects_missing_fields() {
        match NewJob::builder("", "echo hi").build() {
            Err(JobError::Validation(msg)) => assert!(msg.contains("'id'")),
            other => panic!("Expected validation error, got {:?}", other),
        }

        match NewJob::builder("job1", "   ").build() {
            Err(JobError::Validation(msg)) => {
                assert!(msg.contains("job1"));
                assert!(msg.contains("'command'"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }

        assert!(NewJob::builder("job1", "true").max_retries(0).build().is_err());
    }

    #[test]
    fn test_state_vocabulary() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()).unwrap(), state);
        }

        // "failed" is reserved vocabulary, never a state
        assert_eq!(
            JobState::parse("failed"),
            Err(JobError::UnknownState("failed".to_string()))
        );
        assert!(JobState::Processing.is_locked());
        assert!(!JobState::Dead.is_locked());
    }

    #[test]
    fn test_claimable_respects_run_after() {
        let job = NewJob::builder("job1", "true")
            .run_after(1_000)
            .build()
            .unwrap()
            .into_job(Utc::now());

        assert!(!job.is_claimable_at(999));
        assert!(job.is_claimable_at(1_000));
        assert_eq!(job.remaining_attempts(), 3);
    }

    #[test]
    fn test_parse_run_at() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap().timestamp();

        assert_eq!(parse_run_at("2025-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T10:00:00"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T10:00:00.250"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T10:00"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01 10:00"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T15:30:00+0530"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T15:30+05:30"), Some(expected));
        assert_eq!(parse_run_at("2025-01-01T10:00Z"), Some(expected));

        assert_eq!(parse_run_at("2030-01-01"), Some(1_893_456_000));
        assert_eq!(parse_run_at("2030-01-01T10:00"), Some(1_893_492_000));
        assert_eq!(parse_run_at("2030-01-01T10:00:00+0530"), Some(1_893_472_200));

        assert_eq!(parse_run_at("tomorrow"), None);
        assert_eq!(parse_run_at("2030-13-01"), None);
        assert_eq!(parse_run_at(""), None);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&JobState::Dead).unwrap();
        assert_eq!(json, "\"dead\"");
    }
}
