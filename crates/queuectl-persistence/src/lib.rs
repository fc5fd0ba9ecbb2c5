mod config;
mod db;
mod store;

pub use config::{ConfigStore, KEY_BACKOFF_BASE, KEY_MAX_RETRIES, KEY_WORKER_PIDS};
pub use db::{connect, connect_with, init_schema, DbOptions, DEFAULT_DB_PATH};
pub use store::JobStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job already exists: {0}")]
    DuplicateId(String),

    #[error("Corrupt job row (column {column}): {reason}")]
    Decode { column: &'static str, reason: String },

    #[error("Job {id} is no longer owned by worker {worker_id}")]
    LostOwnership { id: String, worker_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
