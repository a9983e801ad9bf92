use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::{AppError, Result};
use crate::domain::execution::{ExecutionMode, PollSettings};

pub const DEFAULT_CONFIG_FILE: &str = "qapilot.toml";
pub const ENV_PREFIX: &str = "QAPILOT_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Root of the QA Pilot server, e.g. `http://localhost:5000`.
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub initial_poll_delay_ms: u64,
    pub sequential_poll_interval_ms: u64,
    pub parallel_poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub notification_ttl_secs: u64,
    pub report_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            request_timeout_secs: 60,
            initial_poll_delay_ms: 1000,
            sequential_poll_interval_ms: 2000,
            parallel_poll_interval_ms: 5000,
            max_poll_attempts: 100,
            notification_ttl_secs: 5,
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl ClientConfig {
    /// Defaults, then the TOML file, then `QAPILOT_*` variables. A `.env`
    /// file in the working directory is loaded first when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::from_sources(path, ENV_PREFIX)
    }

    pub fn from_sources(toml_path: &Path, env_prefix: &str) -> Result<Self> {
        let config: ClientConfig = Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::prefixed(env_prefix))
            .extract()?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|err| {
            AppError::ConfigError(format!("Invalid base_url '{}': {}", self.base_url, err))
        })?;
        if self.max_poll_attempts == 0 {
            return Err(AppError::ConfigError(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.sequential_poll_interval_ms == 0 || self.parallel_poll_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "Poll intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_secs)
    }

    /// Sequential jobs are polled more often because they expose the
    /// per-case progress fields.
    pub fn poll_settings(&self, mode: ExecutionMode) -> PollSettings {
        let interval_ms = match mode {
            ExecutionMode::Sequential => self.sequential_poll_interval_ms,
            ExecutionMode::Parallel => self.parallel_poll_interval_ms,
        };
        PollSettings {
            initial_delay: Duration::from_millis(self.initial_poll_delay_ms),
            interval: Duration::from_millis(interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const UNUSED_PREFIX: &str = "QAPILOT_CONFIG_TEST_UNSET_";

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            ClientConfig::from_sources(&dir.path().join("absent.toml"), UNUSED_PREFIX).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qapilot.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "base_url = \"http://qa.internal:8080\"").unwrap();
        writeln!(file, "max_poll_attempts = 7").unwrap();

        let config = ClientConfig::from_sources(&path, UNUSED_PREFIX).unwrap();
        assert_eq!(config.base_url, "http://qa.internal:8080");
        assert_eq!(config.max_poll_attempts, 7);
        assert_eq!(config.parallel_poll_interval_ms, 5000);
    }

    #[test]
    fn test_zero_attempt_budget_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qapilot.toml");
        std::fs::write(&path, "max_poll_attempts = 0\n").unwrap();

        let err = ClientConfig::from_sources(&path, UNUSED_PREFIX).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_poll_settings_by_mode() {
        let config = ClientConfig::default();
        let sequential = config.poll_settings(ExecutionMode::Sequential);
        let parallel = config.poll_settings(ExecutionMode::Parallel);
        assert_eq!(sequential.interval, Duration::from_millis(2000));
        assert_eq!(parallel.interval, Duration::from_millis(5000));
        assert_eq!(parallel.initial_delay, Duration::from_millis(1000));
        assert_eq!(parallel.max_attempts, 100);
    }
}
