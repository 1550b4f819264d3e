//! Obsolete-record detection and removal.

use tracing::{debug, info};

use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_repo::traits::ContentRepository;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::summary::SyncCounters;

/// Finds target records no longer present in the source and removes them.
///
/// Candidates are target records at or below the watermark (anything newer
/// was just written by this run); each candidate page is probed against the
/// source with an id-set filter, and whatever the probe does not confirm is
/// deleted. A per-page set difference, never a full-table diff, so memory
/// stays bounded by the page size.
pub struct ObsoletionDetector<'a> {
    source: &'a dyn ContentRepository,
    target: &'a dyn ContentRepository,
    config: &'a SyncConfig,
}

impl<'a> ObsoletionDetector<'a> {
    /// Create a detector for one run.
    #[must_use]
    pub fn new(
        source: &'a dyn ContentRepository,
        target: &'a dyn ContentRepository,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Remove obsolete target records of one object type.
    pub async fn sync_type(
        &self,
        type_id: i64,
        watermark_ts: i64,
        channel: Option<i64>,
        counters: &mut SyncCounters,
    ) -> SyncResult<()> {
        let mut candidate_filter = Filter::TypeIs(type_id);
        if watermark_ts > 0 {
            candidate_filter = candidate_filter.and(Filter::UpdatedAtOrBefore(watermark_ts));
        }
        if let Some(channel) = channel {
            candidate_filter = candidate_filter.and(Filter::ChannelIs(channel));
        }

        let batch_size = self.config.obsoletion_batch_size as u64;
        let mut offset: u64 = 0;
        let mut removed_total: u64 = 0;

        loop {
            let page = self
                .target
                .list_ids(&candidate_filter, offset, batch_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len() as u64;

            let missing = self.missing_from_source(type_id, &page).await?;
            let missing_len = missing.len() as u64;
            if !missing.is_empty() {
                debug!(type_id, obsolete = missing.len(), "Removing obsolete records");
                if !self.config.dry_run {
                    self.target.delete_batch(&missing).await?;
                }
                counters.deleted += missing_len;
                removed_total += missing_len;
            }

            // Deleted rows shift the remaining candidates left; only the
            // surviving rows advance the frontier. A dry run deletes
            // nothing and pages straight through.
            if self.config.dry_run {
                offset += page_len;
            } else {
                offset += page_len - missing_len;
            }
        }

        if removed_total > 0 {
            info!(type_id, removed = removed_total, "Obsolete records removed");
        }
        Ok(())
    }

    /// The page ids the source does not confirm.
    ///
    /// The probe carries the run's rule: with deletion explicitly enabled,
    /// records that stopped matching the rule count as gone.
    async fn missing_from_source(
        &self,
        type_id: i64,
        page: &[ContentId],
    ) -> SyncResult<Vec<ContentId>> {
        let mut probe = Filter::TypeIs(type_id).and(Filter::IdIn(page.to_vec()));
        if let Some(ref rule) = self.config.rule {
            probe = probe.and(rule.filter.clone());
        }
        let present = self
            .source
            .list_ids(&probe, 0, page.len() as u64)
            .await?;

        Ok(page
            .iter()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect())
    }
}
