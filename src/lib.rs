//! hostq - select hosts with a boolean tag query language
//!
//! This library evaluates host selection queries such as
//! `role:web and not env:dev` against a locally cached SQLite index of
//! host to tag associations, rebuilt on demand from a tag source.

use thiserror::Error;

pub mod cli;
pub mod config;
pub mod db;
pub mod output;
pub mod query;
pub mod source;

#[cfg(test)]
pub mod testing;

/// Error enum, contains all failure states of the program
#[derive(Debug, Error)]
pub enum HostqError {
    /// Tag index error
    #[error("Database error: {0}")]
    DbError(#[from] db::DbError),
    /// Query parse, build or evaluation error
    #[error("{0}")]
    QueryError(#[from] query::QueryError),
    /// Tag source error
    #[error("Tag source error: {0}")]
    SourceError(#[from] source::SourceError),
    /// Represents a configuration error
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
    /// Writing results failed
    #[error("Output error: {0}")]
    OutputError(#[from] output::OutputError),
    /// Represents an I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_errors_display_unwrapped() {
        let error: HostqError = query::QueryError::InvalidArgument("bad count".into()).into();
        assert_eq!(error.to_string(), query::QueryError::InvalidArgument("bad count".into()).to_string());
    }

    #[test]
    fn test_db_error_conversion() {
        let error: HostqError = db::DbError::Offline.into();
        assert!(matches!(error, HostqError::DbError(db::DbError::Offline)));
        assert!(error.to_string().starts_with("Database error:"));
    }
}
