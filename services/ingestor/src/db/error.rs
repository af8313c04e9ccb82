//! Database error types.

use clusterboard_reconcile::SinkError;
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/ingestor.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A quantity does not fit the column type.
    #[error("value {value} out of range for column {column}")]
    OutOfRange { column: &'static str, value: i128 },

    /// A stored row could not be turned back into a record.
    #[error("invalid stored row in {table}: {reason}")]
    Decode { table: &'static str, reason: String },
}

impl DbError {
    /// True for errors that mean the database could not be reached.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Query(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

impl From<DbError> for SinkError {
    fn from(err: DbError) -> Self {
        if err.is_unavailable() {
            SinkError::Unavailable(err.to_string())
        } else {
            SinkError::Write(err.to_string())
        }
    }
}
