use crate::id::IdRefParseError;
use crate::types::TaskId;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Optimistic write lost a race. The caller re-reads and tries again.
    #[error("Revision conflict on {0}")]
    Conflict(String),

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] IdRefParseError),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
