//! Policy persistence collaborator.
//!
//! # Data Flow
//! ```text
//! administrative API (elsewhere) → rows in a store
//!     → PolicyStore::fetch_active(now)
//!     → enabled rows with started_at < now < ended_at, newest first
//!     → governance::refresher
//! ```
//!
//! # Design Decisions
//! - One query shape only; the control plane never writes back
//! - `MemoryStore` for embedding and tests, `FileStore` for a JSON file
//!   that operators edit (optionally watched for changes)

pub mod file;
pub mod memory;
pub mod record;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::governance::error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{Category, ConfigurationRecord, Status};

/// Source of configuration rows.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Rows that are enabled and valid at `now`, ordered by `updated_at` descending.
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfigurationRecord>, StoreError>;
}
