//! Store error taxonomy
//!
//! Absence is `Option`, never an error. `TransientIo` is retryable; the
//! other kinds are not.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Busy/locked/IO conditions worth retrying with backoff.
    #[error("transient store i/o: {0}")]
    TransientIo(String),

    /// A uniqueness or integrity constraint fired.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The database file or a row in it is unreadable.
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }
}

/// Map a driver error onto the store taxonomy.
///
/// SQLite primary/extended result codes: 5 = BUSY, 6 = LOCKED, 11 = CORRUPT,
/// 26 = NOTADB; constraint family is classified by the driver itself.
pub(crate) fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            use sqlx::error::ErrorKind;
            match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => {
                    return StoreError::ConstraintViolation(db.message().to_string());
                }
                _ => {}
            }
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            match code.as_str() {
                "5" | "6" | "261" | "517" => StoreError::TransientIo(db.message().to_string()),
                "11" | "26" => StoreError::Corrupt(db.message().to_string()),
                _ => StoreError::TransientIo(db.message().to_string()),
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::TransientIo(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(err.to_string())
        }
        _ => StoreError::TransientIo(err.to_string()),
    }
}
