//! Core value types shared across the alerting engine: tag sets, alert keys,
//! severities, and status events.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered set of tag key/value pairs identifying one result group of a
/// rule evaluation (for example `{host=web01,dc=ny}`).
///
/// Tags are kept sorted by key so the canonical string form is stable and can
/// be used as part of a map or serialization key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(pub BTreeMap<String, String>);

impl TagSet {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag, replacing any existing value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns true when every tag in `self` is present in `other` with an
    /// equal value. Used by squelch matching.
    pub fn subset_of(&self, other: &TagSet) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    /// Returns true when the tag set holds no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Identity of one monitored rule instance: the rule name plus the canonical
/// string form of the result group it fired for.
///
/// Rule names are validated at configuration load to exclude braces, so the
/// `Display` form (`name` directly followed by the group string) never
/// collides across distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    /// Name of the alert rule.
    pub name: String,
    /// Canonical `{k=v,...}` string form of the result group.
    pub group: String,
}

impl AlertKey {
    /// Builds the key for a rule name and result group.
    pub fn new(name: impl Into<String>, group: &TagSet) -> Self {
        Self { name: name.into(), group: group.to_string() }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.group)
    }
}

/// Severity of an alert observation. The ordering is significant:
/// `Normal < Warning < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The rule expression evaluated to zero for the group.
    #[default]
    Normal,
    /// The warning expression evaluated non-zero for the group.
    Warning,
    /// The critical expression evaluated non-zero for the group.
    Critical,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A single timestamped severity sample in an alert's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Observed severity.
    pub status: Status,
    /// UTC time the observation was recorded.
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn tag_set_display_is_sorted_and_canonical() {
        let mut group = TagSet::new();
        group.insert("host", "web01");
        group.insert("dc", "ny");
        assert_eq!(group.to_string(), "{dc=ny,host=web01}");
        assert_eq!(TagSet::new().to_string(), "{}");
    }

    #[test]
    fn tag_set_subset_matching() {
        let group = tags(&[("host", "web01"), ("dc", "ny")]);
        assert!(tags(&[("host", "web01")]).subset_of(&group));
        assert!(tags(&[]).subset_of(&group));
        assert!(!tags(&[("host", "web02")]).subset_of(&group));
        assert!(!tags(&[("rack", "r1")]).subset_of(&group));
    }

    #[test]
    fn alert_key_display_and_ordering() {
        let a = AlertKey::new("cpu.high", &tags(&[("host", "a")]));
        let b = AlertKey::new("cpu.high", &tags(&[("host", "b")]));
        assert_eq!(a.to_string(), "cpu.high{host=a}");
        assert!(a < b);
        assert_eq!(a, AlertKey::new("cpu.high", &tags(&[("host", "a")])));
    }

    #[test]
    fn status_is_ordered_by_severity() {
        assert!(Status::Normal < Status::Warning);
        assert!(Status::Warning < Status::Critical);
    }

    #[test]
    fn status_serializes_as_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Critical).unwrap(), "\"critical\"");
        let back: Status = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(back, Status::Warning);
    }
}
