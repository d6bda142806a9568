//! Queue error types.

use jobq_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The store's write lock could not be obtained in time. Retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(DbError),
}

impl QueueError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_))
    }
}

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => QueueError::NotFound(msg),
            DbError::Duplicate(msg) | DbError::Conflict(msg) => QueueError::Conflict(msg),
            DbError::Unavailable(msg) => QueueError::StoreUnavailable(msg),
            other => QueueError::Store(other),
        }
    }
}

impl From<jobq_core::Error> for QueueError {
    fn from(err: jobq_core::Error) -> Self {
        match err {
            jobq_core::Error::NotFound(msg) => QueueError::NotFound(msg),
            jobq_core::Error::InvalidInput(msg) => QueueError::InvalidInput(msg),
            jobq_core::Error::Conflict(msg) => QueueError::Conflict(msg),
            jobq_core::Error::StoreUnavailable(msg) => QueueError::StoreUnavailable(msg),
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
