//! Error taxonomy for the data-access layer.
//!
//! Session-state errors are raised before a backend is ever reached,
//! builder errors before any SQL is issued, and backend errors are passed
//! through verbatim.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no connection available")]
    NoConnection,

    #[error("no database selected")]
    NoDatabase,

    #[error("database not found")]
    DatabaseNotFound,

    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    #[error("operation timed out")]
    Timeout,

    #[error("table doesn't have a primary key")]
    NoPrimaryKey,

    #[error("columns and values count doesn't match")]
    ColumnMismatch,

    #[error("keys or changes are not present")]
    MissingKeys,

    #[error("invalid dsn: {0}")]
    InvalidDsn(String),

    #[error("ssh: {0}")]
    Ssh(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn ssh(message: impl std::fmt::Display) -> Self {
        Self::Ssh(message.to_string())
    }
}
