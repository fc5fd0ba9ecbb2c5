use queuectl_core::{JobError, JobState};
use queuectl_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job {id} already exists")]
    Conflict { id: String },

    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Job {id} is not in dead state (current: {actual})")]
    InvalidState { id: String, actual: JobState },

    #[error("Store error: {0}")]
    Store(PersistenceError),
}

impl From<PersistenceError> for QueueError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::DuplicateId(id) => QueueError::Conflict { id },
            other => QueueError::Store(other),
        }
    }
}

impl From<JobError> for QueueError {
    fn from(err: JobError) -> Self {
        QueueError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
