//! Database error types.

use thiserror::Error;

/// SQLite result codes meaning another connection holds the lock.
const BUSY_CODES: [&str; 4] = ["5", "6", "261", "517"];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl DbError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DbError::Unavailable(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => DbError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => {
                let busy = db
                    .code()
                    .is_some_and(|code| BUSY_CODES.contains(&code.as_ref()));
                if busy {
                    DbError::Unavailable(db.message().to_string())
                } else if db.is_unique_violation() {
                    DbError::Duplicate(db.message().to_string())
                } else {
                    DbError::Database(err)
                }
            }
            _ => DbError::Database(err),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
