//! Configuration rows as the persistence layer hands them over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Policy category of a row; decides how `data` is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    MockTime,
    #[serde(rename = "blockIP")]
    BlockIp,
    SignedKey,
    RouterConcurrency,
    Router,
    RequestConcurrency,
    Email,
    HttpServerInterceptor,
    /// Anything this build does not understand; ignored.
    #[serde(other)]
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MockTime => "mockTime",
            Category::BlockIp => "blockIP",
            Category::SignedKey => "signedKey",
            Category::RouterConcurrency => "routerConcurrency",
            Category::Router => "router",
            Category::RequestConcurrency => "requestConcurrency",
            Category::Email => "email",
            Category::HttpServerInterceptor => "httpServerInterceptor",
            Category::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Enabled,
    Disabled,
}

/// One administered configuration row. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRecord {
    pub name: String,
    pub category: Category,
    pub status: Status,
    #[serde(default)]
    pub data: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationRecord {
    /// Enabled and strictly inside its validity window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Enabled && self.started_at < now && now < self.ended_at
    }
}

/// Sort newest first, the order the refresher relies on.
pub fn sort_newest_first(records: &mut [ConfigurationRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
