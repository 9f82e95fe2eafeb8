use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use super::RecordStore;
use crate::error::StoreError;
use crate::models::Record;

/// In-memory record store. Assigns incrementing ids like a serial column.
#[derive(Debug)]
pub struct MemoryStore {
    next_id: AtomicI64,
    records: Mutex<Vec<Record>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every stored record.
    #[cfg(test)]
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Vec<Record>) -> T) -> Result<T, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait(?Send)]
impl RecordStore for MemoryStore {
    async fn exists(&self, url: &str) -> Result<bool, StoreError> {
        self.with_records(|records| records.iter().any(|r| r.url == url))
    }

    async fn exists_by_title(&self, title: &str) -> Result<bool, StoreError> {
        self.with_records(|records| records.iter().any(|r| r.title == title))
    }

    async fn insert_batch(&self, batch: &[Record]) -> Result<usize, StoreError> {
        self.with_records(|records| {
            let mut written = 0;
            for record in batch {
                if records.iter().any(|r| r.url == record.url) {
                    continue;
                }
                let mut stored = record.clone();
                stored.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
                records.push(stored);
                written += 1;
            }
            written
        })
    }

    async fn query(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError> {
        self.with_records(|records| {
            let mut hits: Vec<Record> = records
                .iter()
                .filter(|r| r.time > start && r.time <= end)
                .filter(|r| kinds.is_none_or(|k| k.contains(&r.kind)))
                .cloned()
                .collect();
            hits.sort_by_key(|r| r.time);
            hits
        })
    }
}
