//! Engine error taxonomy.
//!
//! Every failure class maps to a distinct exit code so operator tooling can
//! tell "would alter the schema" apart from a broken connection without
//! parsing log output.

use thiserror::Error;

use reposync_repo::error::RepoError;

/// Error terminating a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The run configuration is unusable. Raised before any transaction
    /// opens; no repository state has been touched.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// The source repository has no object types or no attribute types and
    /// the run was not told to accept that. Guards against wiping the
    /// target from a misconfigured source.
    #[error("source repository is empty: {message}")]
    EmptySource { message: String },

    /// Applying the schema diff would change physical structure and the
    /// run was not allowed to do so.
    #[error("structural change required: {detail}")]
    StructuralChangeRequired { detail: String },

    /// The two sides of a merge pass disagreed about which records exist.
    /// Something mutated a repository mid-run; continuing could silently
    /// lose data.
    #[error("consistency violation: {detail}")]
    ConsistencyViolation { detail: String },

    /// The record transform hook rejected a record.
    #[error("record transform failed for {content_id}: {message}")]
    Transform {
        content_id: String,
        message: String,
    },

    /// A repository operation failed.
    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl SyncError {
    /// Process exit code for this failure class.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Configuration { .. } => 2,
            SyncError::EmptySource { .. } => 3,
            SyncError::StructuralChangeRequired { .. } => 4,
            SyncError::ConsistencyViolation { .. } => 5,
            SyncError::Transform { .. } => 6,
            SyncError::Repository(_) => 1,
        }
    }

    /// Stable code for logs and automation.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Configuration { .. } => "INVALID_CONFIG",
            SyncError::EmptySource { .. } => "EMPTY_SOURCE",
            SyncError::StructuralChangeRequired { .. } => "STRUCTURAL_CHANGE_REQUIRED",
            SyncError::ConsistencyViolation { .. } => "CONSISTENCY_VIOLATION",
            SyncError::Transform { .. } => "TRANSFORM_FAILED",
            SyncError::Repository(e) => e.error_code(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration {
            message: message.into(),
        }
    }

    /// Create a consistency violation.
    pub fn consistency(detail: impl Into<String>) -> Self {
        SyncError::ConsistencyViolation {
            detail: detail.into(),
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
