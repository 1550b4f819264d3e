//! Record transform hook.

use async_trait::async_trait;
use thiserror::Error;

use reposync_model::record::Record;

/// Error raised by a record transform. Aborts the run.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransformError {
    /// What went wrong.
    pub message: String,
}

impl TransformError {
    /// Create a transform error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A user-supplied transformation applied to every record immediately
/// before it is stored in the target.
///
/// The record arrives with its link attributes already rewritten to
/// portable content ids and its source timestamp stamped; whatever the
/// transform leaves behind is what gets persisted.
#[async_trait]
pub trait RecordTransform: Send + Sync {
    /// Transform one record in place.
    async fn transform(&self, record: &mut Record) -> Result<(), TransformError>;
}
