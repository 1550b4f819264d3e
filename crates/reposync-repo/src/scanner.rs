//! Generic paginated record retrieval.

use reposync_model::filter::Filter;
use reposync_model::record::Record;

use crate::error::RepoResult;
use crate::traits::RecordStore;

/// Deterministically-ordered, offset-paged retrieval of records matching a
/// filter.
///
/// Pages are ordered by content id ascending and the offset only ever moves
/// forward, so concurrent writes to the other repository never disturb the
/// already-consumed part of the scan.
pub struct BatchScanner<'a> {
    store: &'a dyn RecordStore,
    filter: Filter,
    batch_size: u64,
    offset: u64,
    done: bool,
}

impl<'a> BatchScanner<'a> {
    /// Create a scanner over `store` for `filter`.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore, filter: Filter, batch_size: u64) -> Self {
        Self {
            store,
            filter,
            batch_size,
            offset: 0,
            done: false,
        }
    }

    /// Fetch the next page. Returns an empty vector once exhausted.
    pub async fn next_batch(&mut self) -> RepoResult<Vec<Record>> {
        if self.done {
            return Ok(Vec::new());
        }
        let page = self
            .store
            .scan(&self.filter, self.offset, self.batch_size)
            .await?;
        if page.is_empty() {
            self.done = true;
        } else {
            self.offset += page.len() as u64;
        }
        Ok(page)
    }

    /// Total matching records, for progress reporting.
    pub async fn total(&self) -> RepoResult<u64> {
        self.store.count(&self.filter).await
    }
}
