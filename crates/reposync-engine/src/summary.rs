//! Run counters and the summary returned to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Counters accumulated across every object type and channel of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Records added or modified in the target.
    pub upserted: u64,
    /// Records deleted from the target.
    pub deleted: u64,
    /// Object types created in the target.
    pub types_added: u64,
    /// Object types whose attribute set changed.
    pub types_modified: u64,
    /// Object types dropped from the target.
    pub types_removed: u64,
    /// Attribute types added across all modified object types.
    pub attributes_added: u64,
    /// Attribute types altered across all modified object types.
    pub attributes_modified: u64,
    /// Attribute types dropped across all modified object types.
    pub attributes_removed: u64,
}

impl SyncCounters {
    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Fold another counter set into this one.
    pub fn merge(&mut self, other: &SyncCounters) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.types_added += other.types_added;
        self.types_modified += other.types_modified;
        self.types_removed += other.types_removed;
        self.attributes_added += other.attributes_added;
        self.attributes_modified += other.attributes_modified;
        self.attributes_removed += other.attributes_removed;
    }
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Identifier of this run, for log correlation.
    pub run_id: Uuid,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Accumulated counters.
    pub counters: SyncCounters,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

impl SyncSummary {
    /// Records added or modified.
    #[must_use]
    pub fn upserted(&self) -> u64 {
        self.counters.upserted
    }

    /// Records deleted.
    #[must_use]
    pub fn deleted(&self) -> u64 {
        self.counters.deleted
    }
}
