//! Single-value and small-table policy: mock time, signing keys, email groups.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::governance::error::PolicyError;

/// Wall clock that can be pinned to a fixed instant by a `mockTime` row.
#[derive(Debug, Default)]
pub struct MockClock {
    mocked: ArcSwapOption<DateTime<Utc>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(data: &str) -> Result<DateTime<Utc>, PolicyError> {
        DateTime::parse_from_rfc3339(data.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|source| PolicyError::InvalidTimestamp {
                value: data.to_string(),
                source,
            })
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.mocked.store(Some(Arc::new(at)));
    }

    pub fn clear(&self) {
        self.mocked.store(None);
    }

    pub fn mocked(&self) -> Option<DateTime<Utc>> {
        self.mocked.load().as_deref().copied()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.mocked().unwrap_or_else(Utc::now)
    }
}

/// Keys used to sign session cookies. Never empty.
#[derive(Debug)]
pub struct SigningKeys {
    defaults: Arc<Vec<String>>,
    current: ArcSwap<Vec<String>>,
}

impl SigningKeys {
    pub fn new(defaults: Vec<String>) -> Self {
        let defaults = Arc::new(defaults);
        Self {
            current: ArcSwap::new(defaults.clone()),
            defaults,
        }
    }

    /// Split a `signedKey` row into keys.
    pub fn parse(data: &str) -> Vec<String> {
        data.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Publish `keys`, or fall back to the configured defaults when absent or empty.
    /// Returns `true` when the defaults were installed.
    pub fn apply(&self, keys: Option<Vec<String>>) -> bool {
        match keys.filter(|k| !k.is_empty()) {
            Some(keys) => {
                self.current.store(Arc::new(keys));
                false
            }
            None => {
                self.current.store(self.defaults.clone());
                true
            }
        }
    }

    pub fn keys(&self) -> Arc<Vec<String>> {
        self.current.load_full()
    }
}

/// One `email` row: `{name, list}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailGroup {
    pub name: String,
    #[serde(default)]
    pub list: Vec<String>,
}

impl EmailGroup {
    pub fn parse(data: &str) -> Result<Self, PolicyError> {
        let group: EmailGroup = serde_json::from_str(data)?;
        if group.name.trim().is_empty() {
            return Err(PolicyError::Empty("name"));
        }
        Ok(group)
    }
}

/// Recipient lists by group name.
#[derive(Debug, Default)]
pub struct EmailGroups {
    groups: ArcSwap<HashMap<String, Vec<String>>>,
}

impl EmailGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, groups: impl IntoIterator<Item = EmailGroup>) {
        let mut table = HashMap::new();
        for group in groups {
            table.entry(group.name).or_insert(group.list);
        }
        self.groups.store(Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Vec<String> {
        self.groups.load().get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let clock = MockClock::new();
        assert!(clock.mocked().is_none());

        let at = MockClock::parse("2024-02-29T12:00:00+08:00").unwrap();
        clock.set(at);
        assert_eq!(clock.now().to_rfc3339(), "2024-02-29T04:00:00+00:00");

        clock.clear();
        assert!(clock.mocked().is_none());
        assert!(MockClock::parse("yesterday").is_err());
    }

    #[test]
    fn test_signing_keys_fallback() {
        let keys = SigningKeys::new(vec!["default".into()]);
        assert!(!keys.apply(Some(SigningKeys::parse("a, b,,c"))));
        assert_eq!(*keys.keys(), vec!["a", "b", "c"]);

        assert!(keys.apply(Some(SigningKeys::parse(" , "))));
        assert_eq!(*keys.keys(), vec!["default"]);

        keys.apply(Some(vec!["x".into()]));
        assert!(keys.apply(None));
        assert_eq!(*keys.keys(), vec!["default"]);
    }

    #[test]
    fn test_email_groups() {
        let groups = EmailGroups::new();
        groups.replace([
            EmailGroup::parse(r#"{"name":"alarm","list":["ops@example.com"]}"#).unwrap(),
            EmailGroup::parse(r#"{"name":"alarm","list":["stale@example.com"]}"#).unwrap(),
        ]);
        assert_eq!(groups.get("alarm"), vec!["ops@example.com"]);
        assert!(groups.get("missing").is_empty());
        assert!(EmailGroup::parse(r#"{"list":[]}"#).is_err());
    }
}
