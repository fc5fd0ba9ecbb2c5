mod job;
mod policy;
mod error;

pub use job::{parse_run_at, Job, JobId, JobState, NewJob, NewJobBuilder};
pub use policy::{truncate_error, ExecutionOutcome, RetryPolicy, Transition};
pub use error::{JobError, Result};

/// Default attempt ceiling when neither the request nor the config store sets one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default exponential backoff base
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Maximum number of characters kept in `last_error`
pub const MAX_ERROR_LEN: usize = 1000;
