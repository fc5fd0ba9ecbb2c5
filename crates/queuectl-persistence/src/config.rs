use crate::Result;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

pub const KEY_BACKOFF_BASE: &str = "backoff_base";
pub const KEY_MAX_RETRIES: &str = "max_retries";

/// Comma-separated identifiers of running workers, maintained by the launcher
pub const KEY_WORKER_PIDS: &str = "worker_pids";

/// Persisted string key/value settings (the `config` table)
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        ConfigStore { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        debug!("Set config {} = {}", key, value);
        Ok(())
    }

    /// Float value of `key`; missing or unparsable values yield `default`
    pub async fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    /// Integer value of `key`; missing or unparsable values yield `default`
    pub async fn get_u32(&self, key: &str, default: u32) -> Result<u32> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    /// Non-blank entries of a comma-separated value
    pub async fn get_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|v| split_list(&v))
            .unwrap_or_default())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
