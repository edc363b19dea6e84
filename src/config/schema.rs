//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from a TOML file, and
//! every section has defaults so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::governance::{PolicyError, RouteKey};

/// Root configuration for the governor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Routes mounted on the server; also the fixed key set of the
    /// concurrency registry. An explicit list replaces the demo defaults.
    pub routes: Vec<RouteConfig>,

    /// Policy refresh schedule.
    pub refresh: RefreshConfig,

    /// Where configuration rows come from.
    pub store: StoreConfig,

    pub signing: SigningConfig,

    pub governance: GovernanceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            routes: vec![
                RouteConfig::new("GET", "/"),
                RouteConfig::new("GET", "/ping"),
                RouteConfig::new("GET", "/users/me"),
            ],
            refresh: RefreshConfig::default(),
            store: StoreConfig::default(),
            signing: SigningConfig::default(),
            governance: GovernanceConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Parse every configured route into its key.
    pub fn route_keys(&self) -> Result<Vec<RouteKey>, PolicyError> {
        self.routes.iter().map(RouteConfig::key).collect()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A route registered on the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// HTTP method, case-insensitive.
    pub method: String,

    /// Axum path pattern (e.g., "/users/{id}").
    pub path: String,
}

impl RouteConfig {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    pub fn key(&self) -> Result<RouteKey, PolicyError> {
        format!("{} {}", self.method, self.path).parse()
    }
}

/// Refresh schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refresh cycles.
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Configuration row source.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON rows file. Without it rows are held in memory only.
    pub path: Option<String>,

    /// Refresh as soon as the rows file changes.
    pub watch: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Keys used when no `signedKey` row is active.
    pub default_keys: Vec<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            default_keys: vec!["default-signing-key".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Take the client IP from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,

    /// Email group that receives alarms.
    pub alarm_group: String,

    /// Number of recent alarms kept for the admin API.
    pub alarm_history: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_for: false,
            alarm_group: "alarm".to_string(),
            alarm_history: 100,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
