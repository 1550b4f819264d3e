//! Row types for the large-object merge passes.
//!
//! The LOB synchronizer walks two identically-ordered row streams, one per
//! repository, and emits explicit instructions instead of mutating a
//! database cursor in place. These are the row and instruction types shared
//! between the repository implementations that produce the streams and the
//! engine that merges them.

use serde::{Deserialize, Serialize};

use reposync_model::id::ContentId;
use reposync_model::record::AttrValue;

/// Sort key of a detail row: `(content_id, attribute_name, sort_order)`.
///
/// Both sides of the merge order their streams by exactly this key; the
/// merge algorithm is only correct against streams sorted this way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetailKey {
    /// Owning record.
    pub id: ContentId,
    /// Attribute name.
    pub attribute: String,
    /// Position within a multivalue attribute.
    pub sort_order: i32,
}

impl DetailKey {
    /// Create a detail key.
    #[must_use]
    pub fn new(id: ContentId, attribute: impl Into<String>, sort_order: i32) -> Self {
        Self {
            id,
            attribute: attribute.into(),
            sort_order,
        }
    }
}

impl std::fmt::Display for DetailKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.id, self.attribute, self.sort_order)
    }
}

/// One normalized attribute-value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    /// Sort key of the row.
    pub key: DetailKey,
    /// The value payload.
    pub value: AttrValue,
}

impl DetailRow {
    /// Create a detail row.
    #[must_use]
    pub fn new(key: DetailKey, value: AttrValue) -> Self {
        Self { key, value }
    }
}

/// One main-table row restricted to its quick (denormalized) columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickRow {
    /// Owning record.
    pub id: ContentId,
    /// Quick column name and value, in the requested column order.
    pub values: Vec<(String, AttrValue)>,
}

/// A merge instruction produced by the detail-row join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetailOp {
    /// Overwrite the value columns of an existing target row.
    Update(DetailRow),
    /// Insert a row missing from the target.
    Insert(DetailRow),
    /// Delete a target-only row.
    Delete(DetailKey),
}

impl DetailOp {
    /// The key this instruction applies to.
    #[must_use]
    pub fn key(&self) -> &DetailKey {
        match self {
            DetailOp::Update(row) | DetailOp::Insert(row) => &row.key,
            DetailOp::Delete(key) => key,
        }
    }
}

/// Counts of applied merge instructions, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailOpCounts {
    /// Rows updated.
    pub updated: u64,
    /// Rows inserted.
    pub inserted: u64,
    /// Rows deleted.
    pub deleted: u64,
}

impl DetailOpCounts {
    /// Accumulate another set of counts.
    pub fn merge(&mut self, other: DetailOpCounts) {
        self.updated += other.updated;
        self.inserted += other.inserted;
        self.deleted += other.deleted;
    }

    /// Total instructions applied.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.updated + self.inserted + self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_key_ordering() {
        let a = DetailKey::new(ContentId::new(1, 1), "a", 0);
        let b = DetailKey::new(ContentId::new(1, 1), "b", 0);
        let c = DetailKey::new(ContentId::new(1, 1), "b", 1);
        let d = DetailKey::new(ContentId::new(2, 1), "a", 0);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn test_op_key() {
        let key = DetailKey::new(ContentId::new(1, 2), "content", 0);
        let row = DetailRow::new(key.clone(), AttrValue::Text("x".into()));
        assert_eq!(DetailOp::Update(row.clone()).key(), &key);
        assert_eq!(DetailOp::Insert(row).key(), &key);
        assert_eq!(DetailOp::Delete(key.clone()).key(), &key);
    }
}
