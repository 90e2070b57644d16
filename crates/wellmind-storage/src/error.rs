/// Errors that can occur within the storage layer.
///
/// # Migration note
///
/// The store traits currently return `anyhow::Result` for consistency
/// with the job handlers that consume them. This module defines the
/// target error type to be used as the codebase is progressively
/// migrated away from `anyhow`. New code should return
/// `storage::error::Result<T>` where possible.
///
/// # Examples
///
/// ```rust
/// use wellmind_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "scheduled_notification",
///     id: "sn-42".to_string(),
/// };
/// assert!(err.to_string().contains("scheduled_notification"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (e.g. the
    /// conditions column).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A column contained a value outside the expected domain
    /// (e.g. an unknown tier or category string).
    #[error("Storage: invalid value in column '{column}': {message}")]
    InvalidColumnValue {
        column: &'static str,
        message: String,
    },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
