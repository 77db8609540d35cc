use common::{SizeError, UnknownState};
use thiserror::Error;

/// Errors that can occur when talking to the store.
///
/// Conditional updates that simply do not apply (not enough stock, a state
/// that already moved on) are not errors; they come back as outcome values.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<UnknownState> for StoreError {
    fn from(err: UnknownState) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

impl From<SizeError> for StoreError {
    fn from(err: SizeError) -> Self {
        StoreError::Corrupt(format!("invalid size column: {err}"))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
