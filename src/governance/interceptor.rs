//! Before/after request scripts per route (`httpServerInterceptor` category).
//!
//! The registry only stores and looks up script text; running it is the job
//! of a [`crate::http::admission::ScriptRunner`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::governance::error::PolicyError;
use crate::governance::route_key::RouteKey;
use crate::governance::RowOutcome;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorEntry {
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
}

impl InterceptorEntry {
    pub fn is_empty(&self) -> bool {
        self.before.trim().is_empty() && self.after.trim().is_empty()
    }
}

#[derive(Deserialize)]
struct InterceptorRow {
    #[serde(default)]
    router: String,
    #[serde(flatten)]
    entry: InterceptorEntry,
}

/// Parse an interceptor row. `Ok(None)` means the row has no router and is ignored.
pub fn parse_interceptor(data: &str) -> Result<Option<(RouteKey, InterceptorEntry)>, PolicyError> {
    let row: InterceptorRow = serde_json::from_str(data)?;
    if row.router.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some((row.router.parse()?, row.entry)))
}

#[derive(Debug, Default)]
pub struct InterceptorRegistry {
    entries: ArcSwap<HashMap<RouteKey, Arc<InterceptorEntry>>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<'a>(&self, rows: impl IntoIterator<Item = &'a str>) -> RowOutcome {
        let mut outcome = RowOutcome::default();
        let mut entries = HashMap::new();
        for (index, data) in rows.into_iter().enumerate() {
            match parse_interceptor(data) {
                Ok(Some((key, entry))) => {
                    if let Entry::Vacant(slot) = entries.entry(key) {
                        slot.insert(Arc::new(entry));
                        outcome.applied += 1;
                    }
                }
                Ok(None) => tracing::debug!(row = index, "Interceptor row without router ignored"),
                Err(e) => outcome.rejected.push((index, e)),
            }
        }
        self.entries.store(Arc::new(entries));
        outcome
    }

    pub fn get(&self, method: &str, pattern: &str) -> Option<Arc<InterceptorEntry>> {
        self.get_key(RouteKey::new(method, pattern).as_str())
    }

    /// Lookup by an already-normalized `"METHOD /pattern"` key.
    pub fn get_key(&self, route: &str) -> Option<Arc<InterceptorEntry>> {
        let entries = self.entries.load();
        if entries.is_empty() {
            return None;
        }
        entries.get(route).cloned()
    }

    pub fn list(&self) -> HashMap<String, InterceptorEntry> {
        self.entries
            .load()
            .iter()
            .map(|(k, v)| (k.to_string(), (**v).clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
