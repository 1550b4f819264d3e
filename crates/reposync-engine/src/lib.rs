//! # reposync engine
//!
//! Reconciles a writable target content repository with a read-only source:
//! schema diffing and gated application, incremental batched record
//! synchronization, memory-bounded large-object copying over ordered merge
//! joins, obsolete-record removal, and per-channel recursion, all inside
//! one transaction scope per run, resumable through a persisted watermark.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   schema diff / apply   ┌────────────┐
//! │   SOURCE   │────────────────────────►│   TARGET   │
//! │ repository │   ordered record pages  │ repository │
//! │ (read-only)│────────────────────────►│ (written)  │
//! └─────┬──────┘   LOB merge streams     └──────┬─────┘
//!       │                                       │
//!       └──── obsoletion probe (id sets) ◄──────┘
//! ```
//!
//! ## Crate Organization
//!
//! - [`engine`] - `SyncEngine`, the run orchestrator
//! - [`config`] - Run configuration and the compiled filter rule
//! - [`registry`] - Explicit registry of run collaborators
//! - [`schema_diff`] / [`schema_apply`] - Schema reconciliation
//! - [`data_sync`] - Incremental batched record synchronization
//! - [`lob`] - Large-object merge passes
//! - [`obsoletion`] - Obsolete-record detection and removal
//! - [`channel`] - Channel-tree walking
//! - [`summary`] - Run counters and the returned summary
//! - [`transform`] - The per-record transform hook
//! - [`error`] - Failure taxonomy with distinct exit codes

pub mod channel;
pub mod config;
pub mod data_sync;
pub mod engine;
pub mod error;
pub mod lob;
pub mod obsoletion;
pub mod registry;
pub mod schema_apply;
pub mod schema_diff;
pub mod summary;
pub mod transform;

/// Prelude module for convenient imports.
///
/// ```
/// use reposync_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{FilterRule, SyncConfig};
    pub use crate::engine::SyncEngine;
    pub use crate::error::{SyncError, SyncResult};
    pub use crate::registry::Registry;
    pub use crate::schema_diff::{SchemaDiff, SchemaDiffer, TypeSchema};
    pub use crate::summary::{SyncCounters, SyncSummary};
    pub use crate::transform::{RecordTransform, TransformError};
}
