//! Batch persistence with per-record dedup and all-or-nothing inserts.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::dedup::DedupOracle;
use crate::models::Record;
use crate::store::RecordStore;

/// Result of one [`PersistenceGateway::save_batch`] call.
///
/// `failed` means "not newly stored": already-known records and records in a
/// batch whose insert errored both land here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub success: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn RecordStore>,
    oracle: DedupOracle,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn RecordStore>, oracle: DedupOracle) -> Self {
        Self { store, oracle }
    }

    /// Store every record not already known, in a single batch.
    ///
    /// Dedup is decided per record; the insert itself is one call. An insert
    /// error reports the whole batch as failed.
    #[instrument(level = "info", skip_all, fields(batch = records.len()))]
    pub async fn save_batch(&self, records: Vec<Record>) -> SaveSummary {
        let total = records.len();
        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(total);
        let mut known = 0usize;

        for record in records {
            if !seen.insert(record.url.clone()) || self.oracle.is_known(&record.url, &record.title).await {
                info!(url = %record.url, "Already stored; skipping");
                known += 1;
            } else {
                fresh.push(record);
            }
        }

        if fresh.is_empty() {
            info!("No new records to save");
            return SaveSummary {
                success: 0,
                failed: total,
            };
        }

        match self.store.insert_batch(&fresh).await {
            Ok(written) => {
                info!(saved = written, skipped = known, "Saved batch");
                for record in &fresh {
                    info!(%record, "Stored");
                }
                SaveSummary {
                    success: written,
                    failed: total - written,
                }
            }
            Err(e) => {
                error!(error = %e, records = fresh.len(), "Batch insert failed");
                SaveSummary {
                    success: 0,
                    failed: total,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupPolicy;
    use crate::dedup::tests::{DownStore, stored};
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use tokio::task::yield_now;

    /// Memory store that yields before every lookup and insert, so two
    /// gateways interleave between their dedup check and their insert.
    #[derive(Default)]
    struct YieldingStore(MemoryStore);

    #[async_trait(?Send)]
    impl RecordStore for YieldingStore {
        async fn exists(&self, url: &str) -> Result<bool, StoreError> {
            yield_now().await;
            self.0.exists(url).await
        }
        async fn exists_by_title(&self, title: &str) -> Result<bool, StoreError> {
            yield_now().await;
            self.0.exists_by_title(title).await
        }
        async fn insert_batch(&self, records: &[Record]) -> Result<usize, StoreError> {
            yield_now().await;
            self.0.insert_batch(records).await
        }
        async fn query(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
            kinds: Option<&[String]>,
        ) -> Result<Vec<Record>, StoreError> {
            self.0.query(start, end, kinds).await
        }
    }

    fn gateway(store: Arc<dyn RecordStore>) -> PersistenceGateway {
        let oracle = DedupOracle::new(store.clone(), DedupPolicy::Url);
        PersistenceGateway::new(store, oracle)
    }

    #[tokio::test]
    async fn test_saved_urls_become_known() {
        let store = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        let summary = gw
            .save_batch(vec![stored("https://a.com/x/1", "One"), stored("https://a.com/x/2", "Two")])
            .await;
        assert_eq!(summary, SaveSummary { success: 2, failed: 0 });
        assert!(store.exists("https://a.com/x/1").await.unwrap());
        assert!(store.exists("https://a.com/x/2").await.unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_batches_are_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        gw.save_batch(vec![stored("https://a.com/x/1", "One"), stored("https://a.com/x/2", "Two")])
            .await;
        let second = gw
            .save_batch(vec![stored("https://a.com/x/2", "Two"), stored("https://a.com/x/3", "Three")])
            .await;
        assert_eq!(second, SaveSummary { success: 1, failed: 1 });
        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test]
    async fn test_repeated_url_within_batch_counts_once() {
        let store = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        let summary = gw
            .save_batch(vec![stored("https://a.com/x/1", "One"), stored("https://a.com/x/1", "One again")])
            .await;
        assert_eq!(summary, SaveSummary { success: 1, failed: 1 });
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_all_known_reports_all_failed() {
        let store = Arc::new(MemoryStore::new());
        let gw = gateway(store.clone());
        gw.save_batch(vec![stored("https://a.com/x/1", "One")]).await;
        let summary = gw.save_batch(vec![stored("https://a.com/x/1", "One")]).await;
        assert_eq!(summary, SaveSummary { success: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_concurrent_batches_sharing_a_url_keep_their_own_records() {
        let store = Arc::new(YieldingStore::default());
        let gw = gateway(store.clone());
        let (a, b) = futures::join!(
            gw.save_batch(vec![stored("https://a.com/x/shared", "Shared"), stored("https://a.com/x/a", "A")]),
            gw.save_batch(vec![stored("https://a.com/x/shared", "Shared"), stored("https://a.com/x/b", "B")]),
        );
        assert_eq!(a.success + b.success, 3);
        assert_eq!(a.failed + b.failed, 1);
        let mut urls: Vec<_> = store.0.records().into_iter().map(|r| r.url).collect();
        urls.sort();
        assert_eq!(urls, vec!["https://a.com/x/a", "https://a.com/x/b", "https://a.com/x/shared"]);
    }

    #[tokio::test]
    async fn test_insert_error_fails_whole_batch() {
        let gw = gateway(Arc::new(DownStore));
        let summary = gw
            .save_batch(vec![stored("https://a.com/x/1", "One"), stored("https://a.com/x/2", "Two")])
            .await;
        assert_eq!(summary, SaveSummary { success: 0, failed: 2 });
    }
}
