//! Repository error types with transient/permanent classification.

use thiserror::Error;

/// Error that can occur against a content repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Failed to establish a connection to the repository.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The repository is temporarily unavailable.
    #[error("repository unavailable: {message}")]
    Unavailable { message: String },

    /// A SQL statement failed.
    #[error("query failed: {message}")]
    QueryFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction control statement failed.
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A filter cannot be translated for this repository.
    #[error("unsupported filter: {message}")]
    UnsupportedFilter { message: String },

    /// A row held data the model cannot represent.
    #[error("malformed row: {message}")]
    MalformedRow { message: String },

    /// Object type not present in the catalog.
    #[error("object type {type_id} not found")]
    TypeNotFound { type_id: i64 },

    /// Repository-side configuration problem.
    #[error("invalid repository configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl RepoError {
    /// Whether the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepoError::ConnectionFailed { .. } | RepoError::Unavailable { .. }
        )
    }

    /// Stable code for logs and automation.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RepoError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            RepoError::Unavailable { .. } => "UNAVAILABLE",
            RepoError::QueryFailed { .. } => "QUERY_FAILED",
            RepoError::Transaction { .. } => "TRANSACTION_ERROR",
            RepoError::UnsupportedFilter { .. } => "UNSUPPORTED_FILTER",
            RepoError::MalformedRow { .. } => "MALFORMED_ROW",
            RepoError::TypeNotFound { .. } => "TYPE_NOT_FOUND",
            RepoError::InvalidConfiguration { .. } => "INVALID_CONFIG",
        }
    }

    // Convenience constructors

    /// Create a connection failure with an underlying cause.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RepoError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query failure.
    pub fn query_failed(message: impl Into<String>) -> Self {
        RepoError::QueryFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a query failure with an underlying cause.
    pub fn query_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RepoError::QueryFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transaction error with an underlying cause.
    pub fn transaction_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RepoError::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a malformed-row error.
    pub fn malformed_row(message: impl Into<String>) -> Self {
        RepoError::MalformedRow {
            message: message.into(),
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RepoError::ConnectionFailed {
            message: "x".into(),
            source: None
        }
        .is_transient());
        assert!(RepoError::Unavailable { message: "x".into() }.is_transient());
        assert!(!RepoError::query_failed("x").is_transient());
        assert!(!RepoError::TypeNotFound { type_id: 1 }.is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RepoError::query_failed("x").error_code(), "QUERY_FAILED");
        assert_eq!(
            RepoError::malformed_row("x").error_code(),
            "MALFORMED_ROW"
        );
    }
}
