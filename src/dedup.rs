//! The single "already stored?" predicate shared by the pre-fetch filter and
//! the persistence gateway.
//!
//! Lookup failures fail open: the error is logged and the record is treated
//! as unseen.

use std::sync::Arc;
use tracing::warn;

use crate::config::DedupPolicy;
use crate::store::RecordStore;

#[derive(Clone)]
pub struct DedupOracle {
    store: Arc<dyn RecordStore>,
    policy: DedupPolicy,
}

impl DedupOracle {
    pub fn new(store: Arc<dyn RecordStore>, policy: DedupPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Whether a record with this URL (or, under [`DedupPolicy::UrlOrTitle`],
    /// this exact title) has already been stored.
    pub async fn is_known(&self, url: &str, title: &str) -> bool {
        match self.store.exists(url).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!(%url, error = %e, "URL existence check failed; treating as new");
                return false;
            }
        }

        if self.policy == DedupPolicy::Url || title.is_empty() {
            return false;
        }

        match self.store.exists_by_title(title).await {
            Ok(found) => found,
            Err(e) => {
                warn!(%title, error = %e, "Title existence check failed; treating as new");
                false
            }
        }
    }
}
