//! Record storage.
//!
//! [`RecordStore`] is the boundary to the relational store. Two adapters:
//!
//! | Adapter | Module | Notes |
//! |---------|--------|-------|
//! | PostgreSQL | [`postgres`] | one pooled connection per call, one transaction per batch, `ON CONFLICT (url) DO NOTHING` |
//! | In-memory | [`memory`] | dry runs and tests |

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::StoreError;
use crate::models::Record;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait(?Send)]
pub trait RecordStore {
    /// Point lookup by canonical URL.
    async fn exists(&self, url: &str) -> Result<bool, StoreError>;

    /// Point lookup by exact title.
    async fn exists_by_title(&self, title: &str) -> Result<bool, StoreError>;

    /// Insert all records in one batch. Rows whose URL is already stored are
    /// skipped.
    /// Returns the number of rows written.
    async fn insert_batch(&self, records: &[Record]) -> Result<usize, StoreError>;

    /// Records with `start < time <= end`, oldest first, optionally limited
    /// to the given type tags.
    async fn query(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        kinds: Option<&[String]>,
    ) -> Result<Vec<Record>, StoreError>;
}
