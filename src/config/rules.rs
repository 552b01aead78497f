//! Declarative alert rule and notification-chain definitions.
//!
//! These types are the structured input the scheduler consumes; how they are
//! authored (YAML file, API, generated) is up to the caller. The
//! [`RuleLoader`](super::RuleLoader) reads them from a `rules.yaml`.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use super::helpers::{deserialize_duration_from_seconds, serialize_duration_to_seconds};
use crate::models::TagSet;

/// One alert rule: a name, critical and/or warning expressions, squelch
/// entries, a subject template, and the notification targets to escalate
/// through when the rule turns critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name. Must not contain braces, which keeps the
    /// name-plus-group alert key encoding collision free.
    pub name: String,

    /// Expression classifying groups as critical when non-zero.
    #[serde(default)]
    pub crit: Option<String>,

    /// Expression classifying groups as warning when non-zero.
    #[serde(default)]
    pub warn: Option<String>,

    /// Template for the rendered alert subject line.
    #[serde(default)]
    pub subject: Option<String>,

    /// Tag sets suppressing alerting: a result group matching any entry
    /// (every squelch tag present with an equal value) is skipped.
    #[serde(default)]
    pub squelch: Vec<TagSet>,

    /// Names of the notification targets to start a chain on for each fresh
    /// critical transition.
    #[serde(default)]
    pub notifications: Vec<String>,
}

impl AlertRule {
    /// Returns true when alerting for the group is suppressed.
    pub fn squelched(&self, group: &TagSet) -> bool {
        self.squelch.iter().any(|entry| entry.subset_of(group))
    }
}

/// One step of a notification chain: the delivery mechanisms to fire, and
/// optionally a follow-up step reached after a timeout unless the alert is
/// acknowledged first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Unique target name; also the key for pending-chain bookkeeping.
    pub name: String,

    /// Email recipients; empty disables email delivery.
    #[serde(default)]
    pub emails: Vec<String>,

    /// URL to POST an alert payload to.
    #[serde(default)]
    pub post: Option<Url>,

    /// URL to GET when the target fires.
    #[serde(default)]
    pub get: Option<Url>,

    /// Whether to print the alert to the console.
    #[serde(default)]
    pub print: bool,

    /// Name of the follow-up target, escalated to when `timeout` elapses
    /// without an acknowledgment.
    #[serde(default)]
    pub next: Option<String>,

    /// Seconds to wait before escalating to `next`.
    #[serde(
        default,
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds"
    )]
    pub timeout: Duration,
}

/// The full rule configuration consumed by the scheduler: alert rules in
/// definition order plus notification targets by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    /// Alert rules, evaluated in this order.
    pub alerts: Vec<AlertRule>,
    /// Notification chain steps by name.
    pub notifications: HashMap<String, NotificationTarget>,
}

impl RuleSet {
    /// Looks up an alert rule by name.
    pub fn alert(&self, name: &str) -> Option<&AlertRule> {
        self.alerts.iter().find(|rule| rule.name == name)
    }

    /// Looks up a notification target by name.
    pub fn notification(&self, name: &str) -> Option<&NotificationTarget> {
        self.notifications.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn squelch_matches_on_tag_subset() {
        let rule = AlertRule {
            name: "cpu.high".to_string(),
            crit: Some("avg(q(\"cpu\")) > 90".to_string()),
            warn: None,
            subject: None,
            squelch: vec![tags(&[("host", "canary")]), tags(&[("dc", "lab"), ("rack", "r9")])],
            notifications: vec![],
        };

        assert!(rule.squelched(&tags(&[("host", "canary"), ("dc", "ny")])));
        assert!(rule.squelched(&tags(&[("dc", "lab"), ("rack", "r9"), ("host", "x")])));
        assert!(!rule.squelched(&tags(&[("dc", "lab")])));
        assert!(!rule.squelched(&tags(&[("host", "web01")])));
    }

    #[test]
    fn notification_target_defaults() {
        let yaml = r#"{"name": "page"}"#;
        let target: NotificationTarget = serde_json::from_str(yaml).unwrap();
        assert!(target.emails.is_empty());
        assert!(target.post.is_none());
        assert!(!target.print);
        assert!(target.next.is_none());
        assert_eq!(target.timeout, Duration::ZERO);
    }
}
