//! Store that re-reads a JSON array of rows from disk on every fetch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::record::{sort_newest_first, ConfigurationRecord};
use crate::store::{PolicyStore, StoreError};

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicyStore for FileStore {
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfigurationRecord>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<ConfigurationRecord> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Decode(format!("{}: {}", self.path.display(), e)))?;

        let mut active: Vec<_> = records.into_iter().filter(|r| r.is_active(now)).collect();
        sort_newest_first(&mut active);
        Ok(active)
    }
}
