//! Error types for data store operations.
//!
//! Covers the three failure families a store surfaces: loading failures
//! (configuration and initialization), move conflicts, and backend failures.

use thiserror::Error;

use crate::data::SubjectDataKey;

/// Errors that can occur during data store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store construction, initialization or configuration (de)serialization failed.
    #[error("failed to load data store {identifier}: {message}")]
    Loading { identifier: String, message: String },

    /// A move was attempted where the source is missing or the target already exists.
    #[error("move conflicts with existing data: {from} -> {to}")]
    MoveConflict {
        from: SubjectDataKey,
        to: SubjectDataKey,
    },

    /// A backend hook or bulk operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// An operation was attempted before `initialize`.
    #[error("data store {0} has not been initialized")]
    NotInitialized(String),

    /// `initialize` was called twice.
    #[error("data store {0} is already initialized")]
    AlreadyInitialized(String),

    /// No factory is registered under the requested name.
    #[error("unknown data store type: {0}")]
    UnknownFactory(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Build a loading error naming the offending store or config key.
    pub fn loading(identifier: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        StoreError::Loading {
            identifier: identifier.into(),
            message: cause.to_string(),
        }
    }

    /// Returns true if this error prevents the store from being used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Loading { .. } | StoreError::NotInitialized(_)
        )
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// The store itself never retries; this is a hint for the engine.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Database(sqlx::Error::PoolTimedOut)
                | StoreError::Database(sqlx::Error::Io(_))
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            StoreError::Backend(format!("backend task panicked: {err}"))
        } else {
            StoreError::Backend(format!("backend task cancelled: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_display_names_identifier() {
        let err = StoreError::loading("primary", "missing field `path`");
        assert!(err.to_string().contains("primary"));
        assert!(err.to_string().contains("missing field `path`"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_move_conflict_display() {
        let err = StoreError::MoveConflict {
            from: SubjectDataKey::new("user", "nobody"),
            to: SubjectDataKey::new("user", "somebody"),
        };
        let msg = err.to_string();
        assert!(msg.contains("move conflicts with existing data"));
        assert!(msg.contains("user:nobody"));
        assert!(msg.contains("user:somebody"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!StoreError::Backend("boom".to_string()).is_retryable());
        assert!(!StoreError::UnknownFactory("file".to_string()).is_retryable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: StoreError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
