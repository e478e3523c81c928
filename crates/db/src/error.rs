//! Typed error type for the db crate.

use thiserror::Error;

/// Failures of the run-log store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The addressed run does not exist.
    #[error("run not found")]
    NotFound,

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Connection-level problems, as opposed to bad statements or data.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Sqlx(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_))
        )
    }
}
