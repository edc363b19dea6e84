//! Canned per-route responses (`router` category).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::governance::error::PolicyError;
use crate::governance::route_key::RouteKey;
use crate::governance::RowOutcome;

const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A mocked response for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockEntry {
    pub route: RouteKey,
    /// When non-empty, the literal request URL (path and query) must equal it.
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub response: String,
    pub delay_seconds: u64,
}

impl MockEntry {
    /// Parse a `router` row:
    /// `{router, status?, contentType?, response?, delaySeconds?, url?}`.
    pub fn parse(data: &str) -> Result<Self, PolicyError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Row {
            router: String,
            #[serde(default)]
            status: Option<u16>,
            #[serde(default)]
            content_type: Option<String>,
            #[serde(default)]
            response: String,
            #[serde(default)]
            delay_seconds: u64,
            #[serde(default)]
            url: String,
        }

        let row: Row = serde_json::from_str(data)?;
        let route = row.router.parse()?;
        let status = row.status.unwrap_or(200);
        if !(100..=999).contains(&status) {
            return Err(PolicyError::InvalidStatus(status));
        }
        Ok(Self {
            route,
            url: row.url.trim().to_string(),
            status,
            content_type: row
                .content_type
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            response: row.response,
            delay_seconds: row.delay_seconds,
        })
    }

    /// Whether this mock applies to a request with the given path-and-query.
    pub fn matches_url(&self, path_and_query: &str) -> bool {
        self.url.is_empty() || self.url == path_and_query
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Snapshot of mocks keyed by route, replaced wholesale on every refresh.
#[derive(Debug, Default)]
pub struct MockRegistry {
    entries: ArcSwap<HashMap<RouteKey, Arc<MockEntry>>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every row and publish the survivors as one snapshot.
    pub fn update<'a>(&self, rows: impl IntoIterator<Item = &'a str>) -> RowOutcome {
        let mut outcome = RowOutcome::default();
        let mut entries = HashMap::new();
        for (index, data) in rows.into_iter().enumerate() {
            match MockEntry::parse(data) {
                Ok(entry) => {
                    // Rows arrive newest first; keep the newest per route.
                    if let Entry::Vacant(slot) = entries.entry(entry.route.clone()) {
                        slot.insert(Arc::new(entry));
                        outcome.applied += 1;
                    }
                }
                Err(e) => outcome.rejected.push((index, e)),
            }
        }
        self.entries.store(Arc::new(entries));
        outcome
    }

    /// Mock for the route, ignoring any URL requirement.
    pub fn get(&self, method: &str, pattern: &str) -> Option<Arc<MockEntry>> {
        self.get_key(RouteKey::new(method, pattern).as_str())
    }

    /// Mock for an already-normalized `"METHOD /pattern"` key.
    pub fn get_key(&self, route: &str) -> Option<Arc<MockEntry>> {
        let entries = self.entries.load();
        if entries.is_empty() {
            return None;
        }
        entries.get(route).cloned()
    }

    /// Mock for the request, honouring the URL requirement.
    pub fn lookup_key(&self, route: &str, path_and_query: &str) -> Option<Arc<MockEntry>> {
        self.get_key(route)
            .filter(|entry| entry.matches_url(path_and_query))
    }

    pub fn list(&self) -> Vec<MockEntry> {
        let mut entries: Vec<_> = self.entries.load().values().map(|e| (**e).clone()).collect();
        entries.sort_by(|a, b| a.route.cmp(&b.route));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
