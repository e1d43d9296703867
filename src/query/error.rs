//! Query engine error types
//!
//! # Error Types
//!
//! - **`ParseError`**: the query text is not valid syntax
//! - **`BuildError`**: the syntax is valid but names an unknown function or
//!   operator, passes a bad argument, or contains a malformed pattern
//! - **`QueryError`**: anything that stops a query from producing hosts,
//!   wrapping the two above and index errors
//!
//! An empty result is never an error.

use crate::db::DbError;
use nom::error::{VerboseError, VerboseErrorKind, convert_error};
use thiserror::Error;

/// Syntax error in query text
///
/// `position` is the deepest byte offset any alternative reached before
/// failing; `message` is the line/column diagnostic rendered by nom.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Syntax error at position {position}: {}", near(.remainder))]
pub struct ParseError {
    pub position: usize,
    pub remainder: String,
    pub contexts: Vec<String>,
    pub message: String,
}

impl ParseError {
    pub(crate) fn from_verbose(input: &str, error: VerboseError<&str>) -> Self {
        let position = error
            .errors
            .iter()
            .map(|(rest, _)| input.len().saturating_sub(rest.len()))
            .max()
            .unwrap_or(0);
        let contexts = error
            .errors
            .iter()
            .filter_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(context) => Some((*context).to_string()),
                _ => None,
            })
            .collect();
        Self {
            position,
            remainder: input.get(position..).unwrap_or_default().to_string(),
            contexts,
            message: convert_error(input, error),
        }
    }
}

fn near(remainder: &str) -> String {
    match remainder.chars().next() {
        None => "unexpected end of query".to_string(),
        Some(_) => {
            let excerpt: String = remainder.chars().take(20).collect();
            format!("unexpected input near '{excerpt}'")
        }
    }
}

/// Semantic error while turning a parse tree into an expression tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid argument to {function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised while running a query
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// Tag index error during evaluation or reload
    #[error("Index error: {0}")]
    Db(#[from] DbError),

    /// An argument could only be checked at evaluation time
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
