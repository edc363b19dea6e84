//! Operator notifications for governance failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::governance::settings::EmailGroups;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmKind {
    /// A refresh cycle could not read the store.
    StoreUnavailable,
    /// One configuration row could not be applied.
    MalformedRow,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::StoreUnavailable => "store_unavailable",
            AlarmKind::MalformedRow => "malformed_row",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub kind: AlarmKind,
    /// Row name, or `"store"` for cycle-level failures.
    pub source: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl AlarmEvent {
    pub fn new(kind: AlarmKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Sink for alarms. Must not block: it is called from the refresh cycle.
pub trait Alarm: Send + Sync {
    fn raise(&self, event: AlarmEvent);
}

/// Logs alarms with their recipients, counts them, and keeps recent history.
pub struct AlarmCenter {
    emails: Arc<EmailGroups>,
    group: String,
    capacity: usize,
    recent: Mutex<VecDeque<AlarmEvent>>,
}

impl AlarmCenter {
    pub fn new(emails: Arc<EmailGroups>, group: impl Into<String>, capacity: usize) -> Self {
        Self {
            emails,
            group: group.into(),
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Most recent alarms, oldest first.
    pub fn recent(&self) -> Vec<AlarmEvent> {
        let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.iter().cloned().collect()
    }
}

impl Alarm for AlarmCenter {
    fn raise(&self, event: AlarmEvent) {
        let receivers = self.emails.get(&self.group);
        tracing::error!(
            kind = event.kind.as_str(),
            source = %event.source,
            receivers = ?receivers,
            "Governance alarm: {}",
            event.message
        );
        metrics::record_alarm(event.kind.as_str());

        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(event);
    }
}
