//! Error types for the governance control plane.

use thiserror::Error;

/// A single configuration row that could not be turned into policy.
///
/// Always local to one row: the refresher logs it, raises an alarm and
/// applies the rest of the batch.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Row data is not the JSON shape its category expects.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// `router` is not of the form `METHOD /pattern`.
    #[error("invalid router {0:?}, expected \"METHOD /pattern\"")]
    InvalidRouter(String),

    /// A mock row carries a status code outside 100..=999.
    #[error("invalid HTTP status {0}")]
    InvalidStatus(u16),

    /// A mock-time row whose timestamp is not RFC 3339.
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// A block-list entry that is neither an IP nor a CIDR.
    #[error("invalid IP or CIDR {0:?}")]
    InvalidAddress(String),

    /// A required field is present but empty.
    #[error("field `{0}` must not be empty")]
    Empty(&'static str),
}

/// Failure to fetch rows from the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy store unavailable: {0}")]
    Unavailable(String),

    #[error("policy store returned undecodable data: {0}")]
    Decode(String),
}

/// A refresh cycle that did not apply.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The store could not be read; every registry keeps its last state.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Another cycle is still running; this one was skipped.
    #[error("a refresh cycle is already in progress")]
    InProgress,
}

/// An outbound call refused by a `requestConcurrency` limit.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("request concurrency for {name} exceeded: {current} > {max}")]
pub struct OverLimit {
    pub name: String,
    pub current: u32,
    pub max: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PolicyError::InvalidRouter("nope".into());
        assert_eq!(err.to_string(), "invalid router \"nope\", expected \"METHOD /pattern\"");

        let err = RefreshError::from(StoreError::Unavailable("connection refused".into()));
        assert_eq!(err.to_string(), "policy store unavailable: connection refused");
    }
}
