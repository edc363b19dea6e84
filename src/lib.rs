//! Route Governor Library
//!
//! Per-route request governance driven by configuration rows: concurrency
//! ceilings with rate limiting, mocked responses, IP block lists and
//! interceptor scripts, refreshed periodically without restarts.

pub mod admin;
pub mod config;
pub mod governance;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod store;

pub use config::schema::GovernorConfig;
pub use governance::{GovernanceController, PolicyRefresher};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
