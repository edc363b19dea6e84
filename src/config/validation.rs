//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (refresh interval > 0)
//! - Detect malformed, duplicate or conflicting routes, and an empty route table
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GovernorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::config::schema::GovernorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("refresh.interval_secs must be greater than zero")]
    ZeroRefreshInterval,

    #[error("route {index} is invalid: {reason}")]
    InvalidRoute { index: usize, reason: String },

    #[error("route {0} is registered more than once")]
    DuplicateRoute(String),

    #[error("route patterns {first} and {second} differ only in capture names")]
    ConflictingRoute { first: String, second: String },

    #[error("at least one route must be configured")]
    NoRoutes,

    #[error("signing.default_keys must not be empty")]
    NoDefaultSigningKeys,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,

    #[error("{field} is not a socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },
}

pub fn validate_config(config: &GovernorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.refresh.interval_secs == 0 {
        errors.push(ValidationError::ZeroRefreshInterval);
    }

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    let mut seen = HashSet::new();
    let mut shapes: HashMap<String, String> = HashMap::new();
    for (index, route) in config.routes.iter().enumerate() {
        let key = match route.key() {
            Ok(key) => key,
            Err(e) => {
                errors.push(ValidationError::InvalidRoute {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if let Err(reason) = check_pattern(key.pattern()) {
            errors.push(ValidationError::InvalidRoute { index, reason });
            continue;
        }
        if !seen.insert(key.clone()) {
            errors.push(ValidationError::DuplicateRoute(key.to_string()));
            continue;
        }
        let pattern = key.pattern();
        match shapes.get(&pattern_shape(pattern)) {
            Some(first) if first != pattern => errors.push(ValidationError::ConflictingRoute {
                first: first.clone(),
                second: pattern.to_string(),
            }),
            Some(_) => {}
            None => {
                shapes.insert(pattern_shape(pattern), pattern.to_string());
            }
        }
    }

    if config.signing.default_keys.iter().all(|k| k.trim().is_empty()) {
        errors.push(ValidationError::NoDefaultSigningKeys);
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Router pattern syntax: literal segments, whole-segment `{name}`
/// captures, and a `{*name}` catch-all only in the last segment.
pub fn check_pattern(pattern: &str) -> Result<(), String> {
    let segments: Vec<&str> = pattern.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);

    for (position, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(format!(
                "segment `{segment}` uses an unsupported capture prefix, write `{{name}}` instead"
            ));
        }
        if !segment.contains(['{', '}']) {
            continue;
        }
        let inner = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| format!("segment `{segment}` must be a single `{{name}}` capture"))?;
        let (catch_all, name) = match inner.strip_prefix('*') {
            Some(name) => (true, name),
            None => (false, inner),
        };
        if name.is_empty() || name.contains(['{', '}', '*', ':']) {
            return Err(format!("segment `{segment}` has an invalid capture name"));
        }
        if catch_all && position != last {
            return Err(format!("catch-all `{segment}` must be the last segment"));
        }
    }
    Ok(())
}

/// The pattern with capture names erased; two patterns with the same shape
/// collide in the router.
fn pattern_shape(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with("{*") {
                "{*}"
            } else if segment.starts_with('{') {
                "{}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
