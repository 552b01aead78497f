//! Loads and validates the alert rule and notification definitions file.

use std::{collections::HashMap, fs, path::PathBuf};

use config::{Config, File};
use serde::Deserialize;
use thiserror::Error;

use super::rules::{AlertRule, NotificationTarget, RuleSet};

/// On-disk layout of the rules file.
#[derive(Debug, Deserialize)]
struct RuleConfigFile {
    #[serde(default)]
    alerts: Vec<AlertRule>,
    #[serde(default)]
    notifications: Vec<NotificationTarget>,
}

/// Loads rule configurations from a file.
pub struct RuleLoader {
    path: PathBuf,
}

/// Errors that can occur while loading rule configurations.
#[derive(Debug, Error)]
pub enum RuleLoaderError {
    /// Error when reading the rules file.
    #[error("Failed to load rule configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Error when parsing the rules file.
    #[error("Failed to parse rule configuration: {0}")]
    Parse(String),

    /// Error when the rules file format is unsupported.
    #[error("Unsupported rule configuration format")]
    UnsupportedFormat,

    /// The definitions parsed but are not internally consistent.
    #[error("Invalid rule configuration: {0}")]
    Invalid(String),
}

impl RuleLoader {
    /// Creates a new `RuleLoader` instance.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads and validates the rule configuration from the specified file.
    pub fn load(&self) -> Result<RuleSet, RuleLoaderError> {
        if !self.is_yaml_file() {
            return Err(RuleLoaderError::UnsupportedFormat);
        }

        let config_str = fs::read_to_string(&self.path)?;
        let file: RuleConfigFile = Config::builder()
            .add_source(File::from_str(&config_str, config::FileFormat::Yaml))
            .build()
            .map_err(|e| RuleLoaderError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RuleLoaderError::Parse(e.to_string()))?;

        let mut notifications = HashMap::new();
        for target in file.notifications {
            if notifications.insert(target.name.clone(), target).is_some() {
                return Err(RuleLoaderError::Invalid(
                    "duplicate notification target name".to_string(),
                ));
            }
        }

        let rules = RuleSet { alerts: file.alerts, notifications };
        validate(&rules)?;
        Ok(rules)
    }

    /// Checks if the file has a YAML extension.
    fn is_yaml_file(&self) -> bool {
        matches!(self.path.extension().and_then(|ext| ext.to_str()), Some("yaml") | Some("yml"))
    }
}

/// Validates cross references and naming constraints of a rule set.
pub fn validate(rules: &RuleSet) -> Result<(), RuleLoaderError> {
    let mut seen = std::collections::HashSet::new();
    for rule in &rules.alerts {
        if rule.name.is_empty() {
            return Err(RuleLoaderError::Invalid("alert rule with empty name".to_string()));
        }
        if rule.name.contains(['{', '}']) {
            return Err(RuleLoaderError::Invalid(format!(
                "alert rule name '{}' must not contain braces",
                rule.name
            )));
        }
        if !seen.insert(&rule.name) {
            return Err(RuleLoaderError::Invalid(format!(
                "duplicate alert rule name '{}'",
                rule.name
            )));
        }
        if rule.crit.is_none() && rule.warn.is_none() {
            return Err(RuleLoaderError::Invalid(format!(
                "alert rule '{}' has neither a crit nor a warn expression",
                rule.name
            )));
        }
        for target in &rule.notifications {
            if rules.notification(target).is_none() {
                return Err(RuleLoaderError::Invalid(format!(
                    "alert rule '{}' references unknown notification target '{}'",
                    rule.name, target
                )));
            }
        }
    }

    for target in rules.notifications.values() {
        if let Some(next) = &target.next {
            if rules.notification(next).is_none() {
                return Err(RuleLoaderError::Invalid(format!(
                    "notification target '{}' chains to unknown target '{}'",
                    target.name, next
                )));
            }
            if target.timeout.is_zero() {
                return Err(RuleLoaderError::Invalid(format!(
                    "notification target '{}' chains to '{}' without a timeout",
                    target.name, next
                )));
            }
        }
    }

    Ok(())
}
