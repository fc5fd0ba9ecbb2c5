use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Fixed identity; generated per process when absent
    pub worker_id: Option<String>,
    /// Sleep between polls of an empty queue
    pub poll_interval_ms: u64,
    /// Sleep after an iteration fails on a store error
    pub error_backoff_ms: u64,
    /// Hard limit on one command run
    pub execution_timeout_secs: u64,
    /// Overrides the persisted `backoff_base` when set
    pub backoff_base: Option<f64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: None,
            poll_interval_ms: 1000,
            error_backoff_ms: 1000,
            execution_timeout_secs: 300,
            backoff_base: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// `worker-<pid>-<8 hex chars>` unless an id was configured
    pub fn generate_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("worker-{}-{}", pid, &random[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_per_worker() {
        let config = WorkerConfig::default();
        let a = config.generate_worker_id();
        let b = config.generate_worker_id();

        assert_ne!(a, b);
        assert!(a.starts_with(&format!("worker-{}-", std::process::id())));
        assert_eq!(a.rsplit('-').next().unwrap().len(), 8);
    }

    #[test]
    fn test_configured_id_wins() {
        let config = WorkerConfig {
            worker_id: Some("fixed".to_string()),
            ..Default::default()
        };
        assert_eq!(config.generate_worker_id(), "fixed");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: WorkerConfig = serde_yaml::from_str("poll_interval_ms: 250\n").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.execution_timeout(), Duration::from_secs(300));
        assert!(config.backoff_base.is_none());
    }
}
