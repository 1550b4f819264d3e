//! Explicit process registry.

use std::sync::Arc;

use reposync_repo::traits::ContentRepository;

use crate::transform::RecordTransform;

/// The collaborators a synchronization run works against.
///
/// Owned by the process entry point and passed by reference into the
/// engine; there is no process-wide registry or static handle factory.
pub struct Registry {
    /// The read-only repository records flow from.
    pub source: Arc<dyn ContentRepository>,
    /// The repository being brought up to date.
    pub target: Arc<dyn ContentRepository>,
    /// Optional hook applied to every record right before it is stored.
    pub transform: Option<Arc<dyn RecordTransform>>,
}

impl Registry {
    /// Create a registry without a record transform.
    #[must_use]
    pub fn new(source: Arc<dyn ContentRepository>, target: Arc<dyn ContentRepository>) -> Self {
        Self {
            source,
            target,
            transform: None,
        }
    }

    /// Attach a record transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Arc<dyn RecordTransform>) -> Self {
        self.transform = Some(transform);
        self
    }
}
