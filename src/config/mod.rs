//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GovernorConfig (validated, immutable)
//!     → read once at startup by main
//!
//! Policy rows file (store.path, when store.watch is set):
//!     watcher.rs detects change
//!     → PolicyRefresher::trigger
//!     → out-of-schedule refresh cycle
//! ```
//!
//! # Design Decisions
//! - Process config is immutable once loaded; live policy comes from rows
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{GovernorConfig, ListenerConfig, RouteConfig};
pub use watcher::StoreWatcher;
