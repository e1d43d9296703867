//! Tag index error types
//!
//! This module defines all error types that can occur while opening,
//! rebuilding or querying the local tag index.
//!
//! # Error Types
//!
//! - **`SqliteError`**: Errors from the underlying SQLite engine
//! - **`Busy`**: The store stayed locked after the configured number of retries
//! - **`SourceError`**: The tag source failed during a rebuild
//! - **`Offline`**: A rebuild was requested while running offline
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.

use crate::source::SourceError;
use thiserror::Error;

/// Tag index errors
#[derive(Debug, Error)]
pub enum DbError {
    /// Represents an SQLite error
    #[error("Database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// The store was busy for longer than the retry budget allowed
    #[error("Database is busy after {attempts} attempts")]
    Busy { attempts: u32 },

    /// The tag source failed while rebuilding the cache
    #[error("Tag source error: {0}")]
    SourceError(#[from] SourceError),

    /// A rebuild was required but the index is in offline mode
    #[error("Cache rebuild required but running offline")]
    Offline,

    /// Filesystem error around the cache file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid input provided (e.g., an out-of-range term limit)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
