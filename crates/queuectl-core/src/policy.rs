use crate::{Job, JobError, Result, DEFAULT_BACKOFF_BASE, MAX_ERROR_LEN};
use chrono::{DateTime, Utc};

/// Result of running a job's command once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success(String),
    Failure(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn output(&self) -> &str {
        match self {
            ExecutionOutcome::Success(output) | ExecutionOutcome::Failure(output) => output,
        }
    }
}

/// State change to apply to a processing job after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// processing -> completed
    Completed,
    /// processing -> pending, eligible again at `run_after`
    Retry {
        attempts: u32,
        run_after: i64,
        last_error: String,
    },
    /// processing -> dead
    Dead { attempts: u32, last_error: String },
}

impl Transition {
    pub fn label(&self) -> &'static str {
        match self {
            Transition::Completed => "completed",
            Transition::Retry { .. } => "retry",
            Transition::Dead { .. } => "dead",
        }
    }
}

/// Exponential backoff and dead-letter decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    backoff_base: f64,
}

impl RetryPolicy {
    pub fn new(backoff_base: f64) -> Result<Self> {
        if !backoff_base.is_finite() || backoff_base <= 0.0 {
            return Err(JobError::InvalidBackoffBase(backoff_base));
        }
        Ok(RetryPolicy { backoff_base })
    }

    pub fn backoff_base(&self) -> f64 {
        self.backoff_base
    }

    /// Delay before the given attempt number may run again: `floor(base ^ attempt)`
    pub fn backoff_delay_secs(&self, attempt: u32) -> i64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        // float -> int casts saturate, so huge exponents pin at i64::MAX
        self.backoff_base.powi(exponent).floor() as i64
    }

    /// Decide what happens to `job` after one attempt finishing at `now`
    pub fn decide(&self, job: &Job, outcome: &ExecutionOutcome, now: DateTime<Utc>) -> Transition {
        let output = match outcome {
            ExecutionOutcome::Success(_) => return Transition::Completed,
            ExecutionOutcome::Failure(output) => output,
        };

        let attempts = job.attempts.saturating_add(1);
        let last_error = truncate_error(output);

        if attempts < job.max_retries {
            let run_after = now
                .timestamp()
                .saturating_add(self.backoff_delay_secs(attempts));
            Transition::Retry {
                attempts,
                run_after,
                last_error,
            }
        } else {
            Transition::Dead {
                attempts,
                last_error,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

/// Keep at most `MAX_ERROR_LEN` characters of a failure message
pub fn truncate_error(output: &str) -> String {
    output.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobState, NewJob};
    use proptest::prelude::*;

    fn job_with(attempts: u32, max_retries: u32) -> Job {
        let mut job = NewJob::builder("job", "false")
            .max_retries(max_retries)
            .build()
            .unwrap()
            .into_job(Utc::now());
        job.state = JobState::Processing;
        job.attempts = attempts;
        job
    }

    #[test]
    fn test_success_completes_without_touching_attempts() {
        let policy = RetryPolicy::default();
        let job = job_with(1, 3);

        let transition = policy.decide(&job, &ExecutionOutcome::Success("ok".into()), Utc::now());
        assert_eq!(transition, Transition::Completed);
    }

    #[test]
    fn test_backoff_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay_secs(0), 1);
        assert_eq!(policy.backoff_delay_secs(1), 2);
        assert_eq!(policy.backoff_delay_secs(2), 4);
        assert_eq!(policy.backoff_delay_secs(3), 8);

        let fractional = RetryPolicy::new(1.5).unwrap();
        assert_eq!(fractional.backoff_delay_secs(3), 3); // floor(3.375)

        assert_eq!(RetryPolicy::new(10.0).unwrap().backoff_delay_secs(u32::MAX), i64::MAX);
    }

    #[test]
    fn test_invalid_backoff_base() {
        assert!(RetryPolicy::new(0.0).is_err());
        assert!(RetryPolicy::new(-2.0).is_err());
        assert!(RetryPolicy::new(f64::NAN).is_err());
        assert!(RetryPolicy::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_failure_retries_then_dies() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let failure = ExecutionOutcome::Failure("boom".into());

        match policy.decide(&job_with(0, 3), &failure, now) {
            Transition::Retry {
                attempts,
                run_after,
                last_error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(run_after, now.timestamp() + 2);
                assert_eq!(last_error, "boom");
            }
            other => panic!("Expected retry, got {:?}", other),
        }

        match policy.decide(&job_with(2, 3), &failure, now) {
            Transition::Dead { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("Expected dead, got {:?}", other),
        }
    }

    #[test]
    fn test_error_truncated_to_limit() {
        let long = "é".repeat(MAX_ERROR_LEN + 50);
        let transition = RetryPolicy::default().decide(
            &job_with(0, 1),
            &ExecutionOutcome::Failure(long),
            Utc::now(),
        );

        match transition {
            Transition::Dead { last_error, .. } => {
                assert_eq!(last_error.chars().count(), MAX_ERROR_LEN)
            }
            other => panic!("Expected dead, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_dead_iff_failures_reach_ceiling(max_retries in 1u32..20) {
            let policy = RetryPolicy::default();
            let failure = ExecutionOutcome::Failure("err".into());
            let mut job = job_with(0, max_retries);
            let mut failures = 0;

            loop {
                failures += 1;
                match policy.decide(&job, &failure, Utc::now()) {
                    Transition::Retry { attempts, .. } => {
                        prop_assert_eq!(attempts, failures);
                        prop_assert!(attempts < max_retries);
                        job.attempts = attempts;
                    }
                    Transition::Dead { attempts, .. } => {
                        prop_assert_eq!(attempts, max_retries);
                        prop_assert_eq!(failures, max_retries);
                        break;
                    }
                    Transition::Completed => prop_assert!(false, "failure completed a job"),
                }
            }
        }

        #[test]
        fn prop_retry_waits_at_least_base_pow_n(attempts in 0u32..30, base in 1.0f64..4.0) {
            let policy = RetryPolicy::new(base).unwrap();
            let now = Utc::now();
            let job = job_with(attempts, u32::MAX);

            if let Transition::Retry { run_after, .. } =
                policy.decide(&job, &ExecutionOutcome::Failure("err".into()), now)
            {
                let n = attempts + 1;
                prop_assert!(run_after >= now.timestamp() + base.powi(n as i32).floor() as i64);
                prop_assert!(run_after > now.timestamp());
            } else {
                prop_assert!(false, "expected a retry transition");
            }
        }
    }
}
