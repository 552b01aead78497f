//! Application-level settings: evaluation cadence, snapshot location, and
//! optional SMTP delivery credentials.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::helpers::deserialize_duration_from_seconds;

/// Provides the default value for check_interval.
fn default_check_interval() -> Duration {
    Duration::from_secs(300)
}

/// Provides the default value for save_interval.
fn default_save_interval() -> Duration {
    Duration::from_secs(20)
}

/// Provides the default value for state_file.
fn default_state_file() -> PathBuf {
    PathBuf::from("vigil.state")
}

/// Provides the default SMTP port.
fn default_smtp_port() -> u16 {
    587
}

/// Application configuration for the alerting core.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The interval between evaluation passes, in seconds. The scheduler
    /// refuses to run with an interval below one second.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_check_interval"
    )]
    pub check_interval: Duration,

    /// The interval between state snapshots, in seconds, independent of the
    /// evaluation cadence.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_save_interval"
    )]
    pub save_interval: Duration,

    /// Location of the persisted alert-state snapshot.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Path to the alert rule and notification definitions file.
    #[serde(skip_deserializing)]
    pub rules_config_path: PathBuf,

    /// SMTP relay settings for email delivery. When absent, email delivery
    /// attempts fail with a logged error and other mechanisms are
    /// unaffected.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            save_interval: default_save_interval(),
            state_file: default_state_file(),
            rules_config_path: PathBuf::new(),
            smtp: None,
        }
    }
}

/// SMTP relay settings for the standard courier's email mechanism.
#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    /// Relay host name.
    pub host: String,
    /// Relay port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Relay user name.
    pub username: String,
    /// Relay password.
    pub password: String,
    /// Sender address for alert mail.
    pub from: String,
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading `app.yaml` from the
    /// configuration directory, with `VIGIL__`-prefixed environment
    /// variables taking precedence. The rules file is expected at
    /// `rules.yaml` next to it.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir_str = config_dir.unwrap_or("configs");
        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/app.yaml", config_dir_str)))
            .add_source(Environment::with_prefix("VIGIL").separator("__"))
            .build()?;
        let mut config: Self = s.try_deserialize()?;

        config.rules_config_path = Path::new(config_dir_str).join("rules.yaml");

        Ok(config)
    }

    /// Creates a new `AppConfigBuilder` for testing purposes.
    #[cfg(test)]
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// A builder for creating `AppConfig` instances for testing.
#[cfg(test)]
#[derive(Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    pub fn save_interval(mut self, interval: Duration) -> Self {
        self.config.save_interval = interval;
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_file = path.into();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_builder() {
        let config = AppConfig::builder()
            .check_interval(Duration::from_secs(60))
            .state_file("/tmp/alerts.state")
            .build();

        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.save_interval, Duration::from_secs(20));
        assert_eq!(config.state_file, PathBuf::from("/tmp/alerts.state"));
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_app_config_from_file() {
        let config_content = r#"
        check_interval: 120
        save_interval: 10
        state_file: "alerts.state"
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(120));
        assert_eq!(config.save_interval, Duration::from_secs(10));
        assert_eq!(config.state_file, PathBuf::from("alerts.state"));
        assert_eq!(config.rules_config_path, temp_dir.path().join("rules.yaml"));
    }

    #[test]
    fn test_app_config_defaults_and_smtp() {
        let config_content = r#"
        smtp:
          host: "smtp.example.com"
          username: "alerts"
          password: "hunter2"
          from: "alerts@example.com"
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(300));
        assert_eq!(config.save_interval, Duration::from_secs(20));
        let smtp = config.smtp.expect("smtp settings");
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 587);
    }

    #[test]
    fn test_app_config_env_var_override() {
        let config_content = r#"
        state_file: "from-file.state"
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        unsafe {
            std::env::set_var("VIGIL__STATE_FILE", "from-env.state");
        }

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.state_file, PathBuf::from("from-env.state"));

        unsafe {
            std::env::remove_var("VIGIL__STATE_FILE");
        }
    }
}
