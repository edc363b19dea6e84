//! In-process store backed by a concurrent map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::store::record::{sort_newest_first, ConfigurationRecord};
use crate::store::{PolicyStore, StoreError};

/// Rows keyed by their unique name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: DashMap<String, ConfigurationRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ConfigurationRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Insert or replace the row with the same name.
    pub fn upsert(&self, record: ConfigurationRecord) {
        self.rows.insert(record.name.clone(), record);
    }

    pub fn remove(&self, name: &str) -> Option<ConfigurationRecord> {
        self.rows.remove(name).map(|(_, record)| record)
    }

    pub fn clear(&self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfigurationRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|r| r.value().is_active(now))
            .map(|r| r.value().clone())
            .collect();
        sort_newest_first(&mut rows);
        Ok(rows)
    }
}
