use clap::ValueEnum;
use queuectl_persistence::DEFAULT_DB_PATH;
use queuectl_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Process settings for every `queuectl` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
    pub poll_interval_ms: u64,
    pub execution_timeout_secs: u64,
    /// Age after which a claim counts as abandoned.
    /// Defaults to the execution timeout plus one minute.
    pub stale_after_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            poll_interval_ms: 1000,
            execution_timeout_secs: 300,
            stale_after_secs: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&contents)?;
        Ok(settings)
    }

    /// Settings from the optional YAML file, else defaults
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Settings::default()),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        let secs = self
            .stale_after_secs
            .unwrap_or(self.execution_timeout_secs.saturating_add(60));
        Duration::from_secs(secs)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval_ms: self.poll_interval_ms,
            execution_timeout_secs: self.execution_timeout_secs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.db_path, PathBuf::from("queuectl.db"));
        assert_eq!(settings.stale_threshold(), Duration::from_secs(360));
        assert_eq!(settings.worker_config().execution_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "db_path: /tmp/jobs.db\nlog_format: json\nstale_after_secs: 30").unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("/tmp/jobs.db"));
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.stale_threshold(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Settings::load(Some("/nonexistent/queuectl.yaml")).is_err());
    }
}
