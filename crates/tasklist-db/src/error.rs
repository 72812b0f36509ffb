//! Error types for the connection manager.

use thiserror::Error;

/// Errors raised by [`ConnectionManager`](crate::ConnectionManager) operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The connection string was empty.
    #[error("database connection string is empty")]
    EmptyUrl,

    /// The connection string uses a scheme other than SQLite.
    #[error("unsupported database scheme '{0}', expected a sqlite location")]
    UnsupportedScheme(String),

    /// No connection could be checked out of the pool before the timeout.
    #[error("failed to acquire database connection: {source}")]
    Connect {
        /// The pool's timeout error.
        source: r2d2::Error,
        /// Code of the last failed connection attempt, if SQLite reported one.
        last_code: Option<rusqlite::ErrorCode>,
    },

    /// A statement failed inside SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DbError {
    /// Returns the SQLite error code reported by the client, if any.
    ///
    /// For pool timeouts this is the code of the last failed connection attempt.
    pub fn code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            Self::Sqlite(err) => err.sqlite_error_code(),
            Self::Connect { last_code, .. } => *last_code,
            Self::EmptyUrl | Self::UnsupportedScheme(_) => None,
        }
    }

    /// Whether this error means the database itself could not be reached,
    /// as opposed to a statement failing on a live connection.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::EmptyUrl | Self::UnsupportedScheme(_) | Self::Connect { .. } => true,
            Self::Sqlite(_) => matches!(
                self.code(),
                Some(
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::NotADatabase
                        | rusqlite::ErrorCode::PermissionDenied
                )
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_configuration_errors_as_connectivity() {
        assert!(DbError::EmptyUrl.is_connectivity());
        assert!(DbError::UnsupportedScheme("postgres".into()).is_connectivity());
    }

    #[test]
    fn statement_errors_are_not_connectivity() {
        let conn = rusqlite::Connection::open_in_memory().expect("should open in-memory db");
        let err = conn
            .execute_batch("SELECT * FROM missing_table;")
            .map_err(DbError::from)
            .expect_err("query on missing table should fail");

        assert_eq!(err.code(), Some(rusqlite::ErrorCode::Unknown));
        assert!(!err.is_connectivity());
    }
}
