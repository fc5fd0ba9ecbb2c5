use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Invalid job: {0}")]
    Validation(String),

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Invalid backoff base {0}: must be a finite number greater than zero")]
    InvalidBackoffBase(f64),
}

pub type Result<T> = std::result::Result<T, JobError>;
