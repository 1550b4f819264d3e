//! Repository capability traits.
//!
//! The engine sees SOURCE and TARGET exclusively through these traits. They
//! are split by concern; [`ContentRepository`] is the umbrella supertrait a
//! backend implements in full. The engine never issues DDL against SOURCE
//! and never writes records to it, but the trait surface is shared so a
//! single backend type serves both roles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::record::Record;
use reposync_model::schema::{AttributeType, ObjectType};

use crate::cursor::RowSource;
use crate::error::RepoResult;
use crate::rows::{DetailOp, DetailOpCounts, DetailRow, QuickRow};

/// Persisted last-successful-sync state of a target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Last-modification timestamp of the source as of the last successful
    /// run. Zero means "never synced".
    pub timestamp: i64,
    /// The filter rule string the timestamp was computed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl Watermark {
    /// Create a watermark.
    #[must_use]
    pub fn new(timestamp: i64, rule: Option<String>) -> Self {
        Self { timestamp, rule }
    }

    /// Whether the stored rule matches the current run's rule.
    ///
    /// Comparison is trimmed string equality; an absent rule and an empty
    /// rule compare equal. A mismatch invalidates the timestamp and forces
    /// a full resync.
    #[must_use]
    pub fn rule_matches(&self, current: Option<&str>) -> bool {
        let stored = self.rule.as_deref().unwrap_or("").trim();
        let current = current.unwrap_or("").trim();
        stored == current
    }

    /// The timestamp to sync from, honoring the rule comparison.
    #[must_use]
    pub fn effective_timestamp(&self, current_rule: Option<&str>) -> i64 {
        if self.rule_matches(current_rule) {
            self.timestamp
        } else {
            0
        }
    }
}

/// Reads and mutates object-type and attribute-type metadata.
#[async_trait]
pub trait TypeCatalog: Send + Sync {
    /// Load every object type defined in the repository.
    async fn load_object_types(&self) -> RepoResult<Vec<ObjectType>>;

    /// Load the attribute types of one object type.
    async fn load_attribute_types(&self, type_id: i64) -> RepoResult<Vec<AttributeType>>;

    /// Create a new object type. Target side only.
    async fn create_object_type(&self, object_type: &ObjectType) -> RepoResult<()>;

    /// Drop an object type and every record of it. Target side only.
    async fn drop_object_type(&self, type_id: i64) -> RepoResult<()>;

    /// Add an attribute type, creating its quick column when optimized.
    /// Target side only.
    async fn add_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()>;

    /// Replace an attribute type definition, adjusting physical structure
    /// where the quick column changed. Target side only.
    async fn alter_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()>;

    /// Drop an attribute type, its detail rows, and its quick column.
    /// Target side only.
    async fn drop_attribute_type(&self, owner_type_id: i64, name: &str) -> RepoResult<()>;
}

/// Record-level access.
///
/// `scan` and `list_ids` return results strictly ordered by content id
/// ascending; that ordering is load-bearing for merge joins and for
/// deterministic offset continuation. Scanned records carry every
/// non-LOB attribute; large-object values are copied only by the dedicated
/// LOB pass and are never materialized here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one page of records matching the filter.
    async fn scan(&self, filter: &Filter, offset: u64, limit: u64) -> RepoResult<Vec<Record>>;

    /// Fetch one page of matching content ids only.
    async fn list_ids(&self, filter: &Filter, offset: u64, limit: u64)
        -> RepoResult<Vec<ContentId>>;

    /// Count records matching the filter.
    async fn count(&self, filter: &Filter) -> RepoResult<u64>;

    /// Insert or update a batch of records with their non-LOB attributes.
    /// The records' own update timestamps are persisted as given.
    async fn upsert_batch(&self, records: &[Record]) -> RepoResult<()>;

    /// Delete the given records. Returns how many existed.
    async fn delete_batch(&self, ids: &[ContentId]) -> RepoResult<u64>;

    /// The repository's own last-modification timestamp.
    async fn last_modified(&self) -> RepoResult<i64>;

    /// Repair the repository's internal id-sequence counters after bulk
    /// writes. Target side only.
    async fn repair_id_counters(&self) -> RepoResult<()>;
}

/// Persisted watermark access. One watermark per channel; `None` addresses
/// the single-channel watermark.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the stored watermark, if any.
    async fn get_watermark(&self, channel: Option<i64>) -> RepoResult<Option<Watermark>>;

    /// Persist the watermark.
    async fn set_watermark(&self, channel: Option<i64>, watermark: &Watermark) -> RepoResult<()>;
}

/// Ordered row streams and batched instruction application for the LOB
/// merge passes.
#[async_trait]
pub trait LobStore: Send + Sync {
    /// Open an ordered stream over the quick columns of the given records.
    /// Rows come back ordered by content id ascending, restricted to
    /// exactly the given ids.
    async fn open_quick_source(
        &self,
        type_id: i64,
        ids: &[ContentId],
        columns: &[String],
    ) -> RepoResult<Box<dyn RowSource<QuickRow>>>;

    /// Open an ordered stream over the detail rows of the given records,
    /// restricted to the given attribute names, ordered by
    /// `(content_id, attribute_name, sort_order)`.
    async fn open_detail_source(
        &self,
        ids: &[ContentId],
        attributes: &[String],
    ) -> RepoResult<Box<dyn RowSource<DetailRow>>>;

    /// Apply a batch of merge instructions with parameterized statements.
    /// Target side only.
    async fn apply_detail_ops(&self, ops: &[DetailOp]) -> RepoResult<DetailOpCounts>;

    /// Overwrite quick column values of one record. Target side only.
    async fn update_quick_row(
        &self,
        id: &ContentId,
        values: &[(String, AttrValueRef<'_>)],
    ) -> RepoResult<()>;

    /// Recompute a quick column from the detail rows of the given records,
    /// taking the value at sort order zero. The attribute carries the quick
    /// column name and the kind that selects the value column. Target side
    /// only.
    async fn recompute_quick_column(
        &self,
        ids: &[ContentId],
        attribute: &AttributeType,
    ) -> RepoResult<()>;
}

/// Borrowed attribute value, to avoid cloning large payloads on write paths.
pub type AttrValueRef<'a> = &'a reposync_model::record::AttrValue;

/// Session-scoped transaction control on the repository's single pinned
/// connection.
#[async_trait]
pub trait TransactionControl: Send + Sync {
    /// Begin a transaction.
    async fn begin(&self) -> RepoResult<()>;

    /// Commit the open transaction, if any.
    async fn commit(&self) -> RepoResult<()>;

    /// Roll back the open transaction. A no-op when none is open, so
    /// failure paths can roll back unconditionally.
    async fn rollback(&self) -> RepoResult<()>;
}

/// A content repository: everything the sync engine needs from either side.
#[async_trait]
pub trait ContentRepository:
    TypeCatalog + RecordStore + WatermarkStore + LobStore + TransactionControl
{
    /// Human-readable name for logs.
    fn display_name(&self) -> &str;

    /// Set the channel context subsequent operations run under.
    /// Multi-channel repositories scope record writes to this channel.
    async fn set_current_channel(&self, channel: Option<i64>) -> RepoResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_match_trims_and_defaults() {
        let wm = Watermark::new(500, Some("  object.obj_type == 10007 ".to_string()));
        assert!(wm.rule_matches(Some("object.obj_type == 10007")));
        assert!(!wm.rule_matches(Some("object.obj_type == 10008")));
        assert!(!wm.rule_matches(None));

        let no_rule = Watermark::new(500, None);
        assert!(no_rule.rule_matches(None));
        assert!(no_rule.rule_matches(Some("  ")));
        assert!(!no_rule.rule_matches(Some("x")));
    }

    #[test]
    fn test_effective_timestamp_zeroes_on_rule_change() {
        let wm = Watermark::new(500, Some("a".to_string()));
        assert_eq!(wm.effective_timestamp(Some("a")), 500);
        assert_eq!(wm.effective_timestamp(Some("b")), 0);
        assert_eq!(wm.effective_timestamp(None), 0);
    }
}
