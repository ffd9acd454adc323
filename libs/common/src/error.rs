//! Custom error types for the common library
//!
//! This module defines application-specific error types that can be used
//! throughout the application.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred while bootstrapping the schema
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_query_error_keeps_driver_source() {
        let err = DatabaseError::Query(SqlxError::RowNotFound);

        assert!(err.to_string().starts_with("Database query error"));
        assert!(err.source().is_some());
    }
}
