//! Result-shaping functions
//!
//! | Function | Arguments | Result |
//! |---|---|---|
//! | `HEAD`, `LIMIT` | `n = 1` | first `n` hosts |
//! | `TAIL` | `n = 1` | last `n` hosts |
//! | `SLICE` | `start, len = 1` | `len` hosts from offset `start` |
//! | `REVERSE` | | hosts in reverse order |
//! | `SHUFFLE` | | hosts in random order |
//! | `SAMPLE` | `n = 1` | `HEAD(SHUFFLE(expr), n)` |
//! | `ORDER_BY`, `SORT` | `tag?` | ordered by the tag's value, or host name |
//! | `GROUP_BY` | `tag` | first host per distinct tag value |

use super::ast::{MatchKind, Node, Target, canonical_tag_name};
use super::error::QueryError;
use crate::db::TagIndex;
use std::fmt;

/// A resolved function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Head,
    Tail,
    Slice,
    Reverse,
    Shuffle,
    OrderBy,
    GroupBy,
}

impl Function {
    /// Canonical spelling
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Tail => "TAIL",
            Self::Slice => "SLICE",
            Self::Reverse => "REVERSE",
            Self::Shuffle => "SHUFFLE",
            Self::OrderBy => "ORDER_BY",
            Self::GroupBy => "GROUP_BY",
        }
    }

    /// Resolve a function name, case-insensitively
    ///
    /// `SAMPLE` is not a function of its own and resolves to `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HEAD" | "LIMIT" => Some(Self::Head),
            "TAIL" => Some(Self::Tail),
            "SLICE" => Some(Self::Slice),
            "REVERSE" => Some(Self::Reverse),
            "SHUFFLE" => Some(Self::Shuffle),
            "ORDER_BY" | "SORT" => Some(Self::OrderBy),
            "GROUP_BY" => Some(Self::GroupBy),
            _ => None,
        }
    }

    /// Whether the function takes a tag name argument
    #[must_use]
    pub const fn takes_tag(self) -> bool {
        matches!(self, Self::OrderBy | Self::GroupBy)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Argument of a function call, after the target expression
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Integer(i64),
    Str(String),
    /// A tag name that was parsed as a tag expression
    Node(Box<Node>),
}

impl Arg {
    /// The bare tag name this argument denotes, if any; `host` means `@host`
    #[must_use]
    pub fn as_tag_name(&self) -> Option<&str> {
        let name = match self {
            Self::Str(name) => Some(name.as_str()),
            Self::Node(node) => match node.as_ref() {
                Node::Tag(leaf) if leaf.kind == MatchKind::Literal => match leaf.target {
                    Target::AnyField => leaf.value.as_deref(),
                    Target::Tagname => leaf.name.as_deref(),
                    _ => None,
                },
                _ => None,
            },
            Self::Integer(_) => None,
        };
        name.map(canonical_tag_name)
    }
}

/// Apply `function` to already evaluated `ids`
pub(crate) fn apply(
    function: Function,
    ids: Vec<i64>,
    args: &[Arg],
    index: &TagIndex,
) -> Result<Vec<i64>, QueryError> {
    let shaped = match function {
        Function::Head => ids.into_iter().take(count(args, 0, 1)?).collect(),
        Function::Tail => {
            let n = count(args, 0, 1)?;
            let skip = ids.len().saturating_sub(n);
            ids.into_iter().skip(skip).collect()
        }
        Function::Slice => {
            let start = count(args, 0, 0)?;
            let len = count(args, 1, 1)?;
            ids.into_iter().skip(start).take(len).collect()
        }
        Function::Reverse => ids.into_iter().rev().collect(),
        Function::Shuffle => index.shuffle(&ids)?,
        Function::OrderBy => {
            let tag = args.first().map(|arg| tag_name(function, arg)).transpose()?;
            index.order_by_tag(&ids, tag)?
        }
        Function::GroupBy => {
            let arg = args.first().ok_or_else(|| {
                QueryError::InvalidArgument(format!("{function} requires a tag name"))
            })?;
            index.group_by_tag(&ids, tag_name(function, arg)?)?
        }
    };
    Ok(shaped)
}

fn count(args: &[Arg], position: usize, default: usize) -> Result<usize, QueryError> {
    match args.get(position) {
        None => Ok(default),
        Some(Arg::Integer(n)) => usize::try_from(*n)
            .map_err(|_| QueryError::InvalidArgument(format!("count must not be negative, got {n}"))),
        Some(other) => Err(QueryError::InvalidArgument(format!("expected a count, got {other:?}"))),
    }
}

fn tag_name(function: Function, arg: &Arg) -> Result<&str, QueryError> {
    arg.as_tag_name()
        .ok_or_else(|| QueryError::InvalidArgument(format!("{function} expects a tag name")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestIndex;

    fn index() -> TagIndex {
        TestIndex::new().with_tag("role:web", &["web-01", "web-02", "web-03", "web-04"]).build()
    }

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(Function::from_name("limit"), Some(Function::Head));
        assert_eq!(Function::from_name("Sort"), Some(Function::OrderBy));
        assert_eq!(Function::from_name("sample"), None);
        assert_eq!(Function::from_name("frob"), None);
    }

    #[test]
    fn test_positional_functions() {
        let index = index();
        let ids = vec![1, 2, 3, 4];
        let run = |function, args: &[Arg]| apply(function, ids.clone(), args, &index).unwrap();
        assert_eq!(run(Function::Head, &[]), vec![1]);
        assert_eq!(run(Function::Head, &[Arg::Integer(3)]), vec![1, 2, 3]);
        assert_eq!(run(Function::Tail, &[Arg::Integer(2)]), vec![3, 4]);
        assert_eq!(run(Function::Tail, &[Arg::Integer(10)]), vec![1, 2, 3, 4]);
        assert_eq!(run(Function::Slice, &[Arg::Integer(1), Arg::Integer(2)]), vec![2, 3]);
        assert_eq!(run(Function::Slice, &[Arg::Integer(3)]), vec![4]);
        assert_eq!(run(Function::Reverse, &[]), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_negative_count_is_error() {
        let result = apply(Function::Head, vec![1], &[Arg::Integer(-1)], &index());
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    }

    #[test]
    fn test_group_by_requires_tag() {
        let result = apply(Function::GroupBy, vec![1], &[], &index());
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))));
    }

    #[test]
    fn test_tag_argument_from_node() {
        let leaf = crate::query::parse("zone").unwrap();
        assert_eq!(Arg::Node(Box::new(leaf)).as_tag_name(), Some("zone"));
        let leaf = crate::query::parse("zone:").unwrap();
        assert_eq!(Arg::Node(Box::new(leaf)).as_tag_name(), Some("zone"));
        let leaf = crate::query::parse("zone:a").unwrap();
        assert_eq!(Arg::Node(Box::new(leaf)).as_tag_name(), None);
    }

    #[test]
    fn test_host_argument_names_virtual_tag() {
        assert_eq!(Arg::Str("host".into()).as_tag_name(), Some("@host"));
        assert_eq!(Arg::Str("HOST".into()).as_tag_name(), Some("@host"));
        let leaf = crate::query::parse("host").unwrap();
        assert_eq!(Arg::Node(Box::new(leaf)).as_tag_name(), Some("@host"));
    }

    #[test]
    fn test_group_by_host_keeps_every_host() {
        let index = index();
        let ids = vec![3, 1, 2];
        let grouped = apply(Function::GroupBy, ids.clone(), &[Arg::Str("host".into())], &index).unwrap();
        assert_eq!(grouped, vec![1, 2, 3]);
        let ordered = apply(Function::OrderBy, ids, &[Arg::Str("host".into())], &index).unwrap();
        assert_eq!(ordered, vec![1, 2, 3]);
    }
}
