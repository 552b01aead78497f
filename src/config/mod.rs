//! Configuration for the alerting core: application settings and the
//! declarative alert rule / notification-chain definitions.

mod app_config;
mod helpers;
mod rule_loader;
mod rules;

pub use app_config::{AppConfig, SmtpConfig};
pub use helpers::{deserialize_duration_from_seconds, serialize_duration_to_seconds};
pub use rule_loader::{RuleLoader, RuleLoaderError, validate};
pub use rules::{AlertRule, NotificationTarget, RuleSet};
