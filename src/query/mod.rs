//! Host selection query language
//!
//! Text goes through four stages:
//!
//! 1. [`grammar::parse`] turns it into an untyped parse tree
//! 2. [`builder::build`] resolves the tree into an expression [`Node`]
//! 3. [`optimize_fully`] rewrites the expression into cheaper queries
//! 4. [`Node::evaluate`] runs it against a [`TagIndex`](crate::db::TagIndex)
//!
//! [`Evaluator`] runs all four and rebuilds the cache once when a query
//! matches nothing.
//!
//! # Examples
//! ```
//! use hostq::db::{IndexOptions, TagIndex};
//! use hostq::query::{Evaluator, QueryOptions, ReloadState};
//! use hostq::source::MemorySource;
//!
//! let source = MemorySource::new("static")
//!     .with_tag("role:web", ["web-01", "web-02"])
//!     .with_tag("env:prod", ["web-01"]);
//! let mut index = TagIndex::open_in_memory(IndexOptions::default()).unwrap();
//! index.rebuild(&source).unwrap();
//!
//! let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
//! let ids = evaluator.search("role:web and env:prod", &mut ReloadState::default()).unwrap();
//! assert_eq!(ids.len(), 1);
//! ```

pub mod ast;
pub mod builder;
pub mod error;
pub mod evaluate;
pub mod functions;
pub mod grammar;
pub mod optimize;

pub use ast::{BinaryOp, MatchKind, Node, QueryLeaf, TagMatch, Target, UnaryOp};
pub use error::{BuildError, ParseError, QueryError};
pub use evaluate::{EvalContext, Evaluator, ReloadState};
pub use functions::{Arg, Function};
pub use optimize::{DEFAULT_ITERATIONS, OptimizeOptions, optimize_fully};

/// Evaluation knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Match literals exactly, without glob fallbacks
    pub fixed_string: bool,
    /// Bound of optimizer passes
    pub optimize_iterations: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { fixed_string: false, optimize_iterations: DEFAULT_ITERATIONS }
    }
}

/// Parse and build `text` into an unoptimized expression tree
///
/// # Errors
///
/// Returns `QueryError::Parse` on syntax errors and `QueryError::Build` on
/// unknown functions, bad arguments or malformed patterns.
pub fn parse(text: &str) -> Result<Node, QueryError> {
    let tree = grammar::parse(text)?;
    Ok(builder::build(&tree)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        for text in [
            "role:web",
            "role:web-01 and env:prod",
            "a:1 or b:2 xor not c:3",
            ":value",
            "name:",
            "host:web-*",
            "/^r/:/w$/",
            "\"quoted value\" and \"and\"",
            "HEAD(role:web, 3)",
            "SLICE(REVERSE(x), 1, 2)",
            "ORDER_BY(role:web, \"zone\")",
            "GROUP_BY(SHUFFLE(*), zone)",
            "SAMPLE(x:y, 2)",
            "k=v:w",
        ] {
            let node = parse(text).unwrap();
            let again = parse(&node.to_string()).unwrap();
            assert_eq!(again.dump(), node.dump(), "{text} -> {node}");
        }
    }

    #[test]
    fn test_optimized_display_round_trip() {
        let options = OptimizeOptions { fixed_string: true, ..Default::default() };
        for text in ["role:web and env:prod", "a:1 or a:2 or a:3", "not not x"] {
            let node = optimize_fully(&parse(text).unwrap(), &options, DEFAULT_ITERATIONS);
            let rendered = node.to_string();
            assert!(parse(&rendered).is_ok(), "{rendered}");
        }
    }
}
