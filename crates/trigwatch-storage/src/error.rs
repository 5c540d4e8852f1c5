use std::time::Duration;

use trigwatch_common::error::ErrorKind;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use trigwatch_common::error::ErrorKind;
/// use trigwatch_storage::error::StorageError;
///
/// let err = StorageError::LockNotAcquired {
///     name: "trigger-create:abc".to_string(),
/// };
/// assert!(err.to_string().contains("trigger-create:abc"));
/// assert_eq!(err.kind(), ErrorKind::Conflict);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The shared store cannot be reached.
    #[error("Storage: backing store unavailable: {0}")]
    Unavailable(String),

    /// A store call outlived its deadline.
    #[error("Storage: operation timed out after {0:?}")]
    Timeout(Duration),

    /// Every acquisition attempt of a distributed mutex failed.
    #[error("Storage: lock '{name}' is held by another process")]
    LockNotAcquired { name: String },

    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure of a stored value.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) | Self::Sqlite(_) => {
                ErrorKind::BackingStoreUnavailable
            }
            Self::LockNotAcquired { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Json(_) | Self::Other(_) => ErrorKind::InternalError,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
