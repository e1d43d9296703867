//! Tag source error types
//!
//! Errors raised while pulling ground-truth host/tag/downtime data from a
//! [`TagSource`](super::TagSource). Any of these aborts a cache rebuild; the
//! existing cache is left untouched.

use std::io;
use thiserror::Error;

/// Errors produced by tag source providers
#[derive(Debug, Error)]
pub enum SourceError {
    /// The provider could not be reached or refused the request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading a source dump from disk failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The provider returned data that violates its contract
    #[error("Invalid source data: {0}")]
    InvalidData(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
