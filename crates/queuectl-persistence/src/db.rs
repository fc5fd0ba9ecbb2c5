use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Database file used when neither settings nor `QUEUECTL_DB_PATH` name one
pub const DEFAULT_DB_PATH: &str = "queuectl.db";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        command TEXT NOT NULL,
        state TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        locked_by TEXT,
        locked_at TEXT,
        last_error TEXT,
        run_after INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_state_run_after
    ON jobs(state, run_after, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

const CONFIG_DEFAULTS: &[(&str, &str)] = &[
    ("backoff_base", "2"),
    ("max_retries", "3"),
    ("worker_pids", ""),
];

/// Connection settings for the job database
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DbOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbOptions {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            path: PathBuf::from(DEFAULT_DB_PATH),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Open (creating if needed) the database at `path` with default options
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool> {
    connect_with(&DbOptions::new(path.as_ref())).await
}

/// Open the database in WAL mode and make sure the schema exists
pub async fn connect_with(options: &DbOptions) -> Result<SqlitePool> {
    if let Some(parent) = options.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Competing writers wait up to `busy_timeout` for the write lock
    let connect_options = SqliteConnectOptions::new()
        .filename(&options.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    init_schema(&pool).await?;

    info!("Opened job database at {:?}", options.path);
    Ok(pool)
}

/// Create tables and seed configuration defaults. Idempotent.
///
/// Every statement runs on its own so that several worker processes
/// bootstrapping at once only ever wait on the write lock.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    for &(key, value) in CONFIG_DEFAULTS {
        sqlx::query("INSERT OR IGNORE INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    debug!("Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_schema_and_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("queue.db");

        let pool = connect(&path).await.unwrap();
        assert!(path.exists());

        let value: String = sqlx::query_scalar("SELECT value FROM config WHERE key = 'backoff_base'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "2");

        // Running the bootstrap again must not reset operator changes
        sqlx::query("UPDATE config SET value = '3' WHERE key = 'backoff_base'")
            .execute(&pool)
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();

        let value: String = sqlx::query_scalar("SELECT value FROM config WHERE key = 'backoff_base'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value, "3");
    }
}
