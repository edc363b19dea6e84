//! Named concurrency limits for outbound calls (`requestConcurrency` category).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::governance::error::{OverLimit, PolicyError};

/// One `requestConcurrency` row: `{name, max}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequestLimit {
    pub name: String,
    #[serde(default)]
    pub max: u32,
}

impl RequestLimit {
    pub fn parse(data: &str) -> Result<Self, PolicyError> {
        let limit: RequestLimit = serde_json::from_str(data)?;
        if limit.name.trim().is_empty() {
            return Err(PolicyError::Empty("name"));
        }
        Ok(limit)
    }
}

/// A governed name with its live count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestLimitStatus {
    pub name: String,
    pub max: u32,
    pub in_flight: u32,
}

/// Limit table (swapped per refresh) plus live counters. Only governed
/// names get a counter; counters of names dropped from the table are
/// pruned once idle.
#[derive(Debug, Default)]
pub struct RequestLimits {
    limits: ArcSwap<HashMap<String, u32>>,
    in_flight: DashMap<String, Arc<AtomicU32>>,
}

impl RequestLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new limit table. First occurrence of a name wins.
    pub fn replace(&self, limits: impl IntoIterator<Item = RequestLimit>) {
        let mut table = HashMap::new();
        for limit in limits {
            table.entry(limit.name).or_insert(limit.max);
        }
        self.in_flight.retain(|name, counter| {
            table.get(name).is_some_and(|max| *max > 0) || counter.load(Ordering::Acquire) > 0
        });
        self.limits.store(Arc::new(table));
    }

    pub fn limit(&self, name: &str) -> Option<u32> {
        self.limits.load().get(name).copied()
    }

    /// Take an in-flight slot for `name`. Names without a limit (or with
    /// `max == 0`) always succeed.
    pub fn try_acquire(&self, name: &str) -> Result<RequestPermit, OverLimit> {
        let max = match self.limit(name) {
            Some(max) if max > 0 => max,
            _ => return Ok(RequestPermit { counter: None }),
        };
        let counter = match self.in_flight.get(name) {
            Some(counter) => counter.clone(),
            None => self.in_flight.entry(name.to_string()).or_default().clone(),
        };
        let current = counter.fetch_add(1, Ordering::AcqRel) + 1;
        let permit = RequestPermit {
            counter: Some(counter),
        };
        if max > 0 && current > max {
            return Err(OverLimit {
                name: name.to_string(),
                current,
                max,
            });
        }
        Ok(permit)
    }

    pub fn in_flight(&self, name: &str) -> u32 {
        self.in_flight
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u32> {
        (**self.limits.load()).clone()
    }

    /// Every governed name with its live count, sorted by name.
    pub fn status(&self) -> Vec<RequestLimitStatus> {
        let mut status: Vec<_> = self
            .limits
            .load()
            .iter()
            .map(|(name, max)| RequestLimitStatus {
                name: name.clone(),
                max: *max,
                in_flight: self.in_flight(name),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }
}

/// Releases an outbound slot on drop.
#[derive(Debug)]
pub struct RequestPermit {
    counter: Option<Arc<AtomicU32>>,
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        if let Some(counter) = &self.counter {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
