//! Expression tree
//!
//! A query is a closed tree of [`Node`]s. Leaves are [`TagMatch`]es, each
//! compiling to one SQL condition over the tag index, or [`QueryLeaf`]s the
//! optimizer compiled from several leaves. Inner nodes combine their
//! children's host ids with set algebra or shape them with a function.
//!
//! Every node renders back to query text through `Display` and to a
//! canonical JSON structure through [`Node::dump`].

use super::functions::{Arg, Function};
use super::grammar::{is_glob_char, is_keyword, is_name_char, is_value_char};
use crate::db::schema::HOST_TAG;
use crate::db::{SqlQuery, Tables};
use rusqlite::types::Value;
use serde_json::json;
use std::fmt;

/// Which host attributes a tag match compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Host name
    Host,
    /// Tag name and value
    Tag,
    /// Tag name only
    Tagname,
    /// Host name or tag value
    Tagvalue,
    /// Host name, tag name or tag value
    AnyField,
}

impl Target {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Tag => "tag",
            Self::Tagname => "tagname",
            Self::Tagvalue => "tagvalue",
            Self::AnyField => "any",
        }
    }

    #[must_use]
    pub const fn tables(self) -> Tables {
        match self {
            Self::Host => Tables::Hosts,
            Self::Tag | Self::Tagname => Tables::Tags,
            Self::Tagvalue | Self::AnyField => Tables::Both,
        }
    }
}

/// How a tag match compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Literal,
    Glob,
    Regex,
}

impl MatchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Literal => "literal",
            Self::Glob => "glob",
            Self::Regex => "regex",
        }
    }

    /// Predicate over `column` with one placeholder
    fn predicate(self, column: &str) -> String {
        match self {
            Self::Literal => format!("{column} = ?"),
            Self::Glob => format!("LOWER({column}) GLOB LOWER(?)"),
            Self::Regex => format!("{column} REGEXP ?"),
        }
    }
}

/// Leaf matching hosts by name, tag name or tag value
#[derive(Debug, Clone, PartialEq)]
pub struct TagMatch {
    pub target: Target,
    pub kind: MatchKind,
    pub name: Option<String>,
    pub value: Option<String>,
    pub separator: Option<char>,
    /// Evaluated once when this leaf matches nothing
    pub fallback: Option<Box<Node>>,
}

impl TagMatch {
    #[must_use]
    pub fn new(target: Target, kind: MatchKind, name: Option<String>, value: Option<String>) -> Self {
        let separator =
            (name.is_some() && value.is_some()) || matches!(target, Target::Tagname | Target::Tagvalue);
        Self {
            target,
            kind,
            name,
            value,
            separator: separator.then_some(':'),
            fallback: None,
        }
    }

    /// Tables, condition and bound values of this leaf
    #[must_use]
    pub fn condition(&self) -> (Tables, SqlQuery) {
        let name = self.name.clone().unwrap_or_default();
        let value = self.value.clone().unwrap_or_default();
        let p = |column: &str| self.kind.predicate(column);
        let condition = match self.target {
            Target::Host => SqlQuery::with_values(p("hosts.name"), vec![Value::from(value)]),
            Target::Tag => SqlQuery::with_values(
                format!("{} AND {}", p("tags.name"), p("tags.value")),
                vec![Value::from(name), Value::from(value)],
            ),
            Target::Tagname => SqlQuery::with_values(p("tags.name"), vec![Value::from(name)]),
            Target::Tagvalue => SqlQuery::with_values(
                format!("{} OR {}", p("hosts.name"), p("tags.value")),
                vec![Value::from(value.clone()), Value::from(value)],
            ),
            Target::AnyField => SqlQuery::with_values(
                format!("{} OR {} OR {}", p("hosts.name"), p("tags.name"), p("tags.value")),
                vec![Value::from(value.clone()), Value::from(value.clone()), Value::from(value)],
            ),
        };
        (self.target.tables(), condition)
    }

    /// Standalone query yielding a `host_id` column
    #[must_use]
    pub fn to_query(&self) -> SqlQuery {
        let (tables, condition) = self.condition();
        let mut query = SqlQuery::new(format!("{} WHERE ", tables.select_prefix()));
        query.append(&condition);
        query
    }

    /// The glob leaf a literal leaf falls back to
    #[must_use]
    pub fn glob_fallback(&self) -> Self {
        let (name, value) = match self.target {
            Target::Tagname => (self.name.as_deref().map(globify), self.value.clone()),
            _ => (self.name.clone(), self.value.as_deref().map(globify)),
        };
        Self {
            target: self.target,
            kind: MatchKind::Glob,
            name,
            value,
            separator: self.separator,
            fallback: None,
        }
    }

    fn dump(&self) -> serde_json::Value {
        json!({
            "node": "tag",
            "target": self.target.as_str(),
            "kind": self.kind.as_str(),
            "name": self.name,
            "separator": self.separator.map(String::from),
            "value": self.value,
            "fallback": self.fallback.as_ref().map(|node| node.dump()),
        })
    }
}

/// Wrap `value` in `*` and turn `- . / _` into `?`
#[must_use]
pub fn globify(value: &str) -> String {
    let mut glob: String = value
        .chars()
        .map(|c| if matches!(c, '-' | '.' | '/' | '_') { '?' } else { c })
        .collect();
    if !value.starts_with('*') {
        glob.insert(0, '*');
    }
    if !value.ends_with('*') {
        glob.push('*');
    }
    glob
}

/// A compiled query yielding a `host_id` column
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLeaf {
    pub query: SqlQuery,
    /// The tree this query was compiled from
    pub fallback: Option<Box<Node>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Noop,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
}

impl BinaryOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
        }
    }
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Everything,
    Nothing,
    Tag(TagMatch),
    Query(QueryLeaf),
    Unary {
        op: UnaryOp,
        expr: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// OR over two or more expressions
    Multinary {
        exprs: Vec<Node>,
        fallback: Option<Box<Node>>,
    },
    Funcall {
        function: Function,
        expr: Box<Node>,
        args: Vec<Arg>,
    },
}

impl Node {
    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    #[must_use]
    pub fn not(expr: Self) -> Self {
        Self::Unary { op: UnaryOp::Not, expr: Box::new(expr) }
    }

    /// Standalone query of a leaf, if this node is one
    #[must_use]
    pub fn storable_query(&self) -> Option<SqlQuery> {
        match self {
            Self::Tag(leaf) => Some(leaf.to_query()),
            Self::Query(leaf) => Some(leaf.query.clone()),
            _ => None,
        }
    }

    /// Canonical structure, for comparing trees and golden output
    #[must_use]
    pub fn dump(&self) -> serde_json::Value {
        match self {
            Self::Everything => json!({ "node": "everything" }),
            Self::Nothing => json!({ "node": "nothing" }),
            Self::Tag(leaf) => leaf.dump(),
            Self::Query(leaf) => json!({
                "node": "query",
                "sql": leaf.query.sql(),
                "values": leaf.query.values().iter().map(dump_value).collect::<Vec<_>>(),
                "fallback": leaf.fallback.as_ref().map(|node| node.dump()),
            }),
            Self::Unary { op, expr } => json!({
                "node": "unary",
                "op": match op { UnaryOp::Noop => "NOOP", UnaryOp::Not => "NOT" },
                "expr": expr.dump(),
            }),
            Self::Binary { op, left, right } => json!({
                "node": "binary",
                "op": op.as_str(),
                "left": left.dump(),
                "right": right.dump(),
            }),
            Self::Multinary { exprs, fallback } => json!({
                "node": "multinary",
                "op": "OR",
                "exprs": exprs.iter().map(Self::dump).collect::<Vec<_>>(),
                "fallback": fallback.as_ref().map(|node| node.dump()),
            }),
            Self::Funcall { function, expr, args } => json!({
                "node": "funcall",
                "function": function.name(),
                "expr": expr.dump(),
                "args": args.iter().map(|arg| match arg {
                    Arg::Integer(n) => json!(n),
                    Arg::Str(text) => json!(text),
                    Arg::Node(node) => node.dump(),
                }).collect::<Vec<_>>(),
            }),
        }
    }
}

fn dump_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(n) => json!(n),
        Value::Real(x) => json!(x),
        Value::Text(text) => json!(text),
        Value::Blob(bytes) => json!(bytes),
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everything => f.write_str("*"),
            Self::Nothing => f.write_str("NOT (*)"),
            Self::Tag(leaf) => write!(f, "{leaf}"),
            Self::Query(leaf) => match &leaf.fallback {
                Some(node) => write!(f, "{node}"),
                None => write!(f, "QUERY({})", quote(leaf.query.sql())),
            },
            Self::Unary { op: UnaryOp::Noop, expr } => write!(f, "{expr}"),
            Self::Unary { op: UnaryOp::Not, expr } => write!(f, "NOT ({expr})"),
            Self::Binary { op, left, right } => write!(f, "({left}) {} ({right})", op.as_str()),
            Self::Multinary { exprs, .. } => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "({expr})")?;
                }
                Ok(())
            }
            Self::Funcall { function, expr, args } => {
                write!(f, "{function}({expr}")?;
                for arg in args {
                    match arg {
                        Arg::Integer(n) => write!(f, ", {n}")?,
                        Arg::Str(text) => write!(f, ", {}", quote(text))?,
                        Arg::Node(node) => write!(f, ", {node}")?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for TagMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = self.separator.unwrap_or(':');
        if let Some(name) = &self.name {
            f.write_str(&token(self.kind, name, false))?;
            if self.value.is_none() && self.target != Target::Tagname {
                return Ok(());
            }
            write!(f, "{separator}")?;
        } else if self.target == Target::Tagvalue {
            write!(f, "{separator}")?;
        }
        if let Some(value) = &self.value {
            // a bare value with no name sits where a name would
            let value_position = self.name.is_some() || self.target == Target::Tagvalue;
            f.write_str(&token(self.kind, value, value_position))?;
        }
        Ok(())
    }
}

/// Render one token so that it parses back to the same text and kind
fn token(kind: MatchKind, text: &str, value_position: bool) -> String {
    let plain = if value_position { is_value_char } else { is_name_char };
    match kind {
        MatchKind::Regex => format!("/{}/", text.replace('/', "\\/")),
        MatchKind::Glob
            if !text.is_empty() && !is_keyword(text) && text.chars().all(|c| plain(c) || is_glob_char(c)) =>
        {
            text.to_string()
        }
        MatchKind::Literal if !text.is_empty() && text.chars().all(plain) && !is_keyword(text) => {
            text.to_string()
        }
        _ => quote(text),
    }
}

/// Double-quote `text`, escaping `\` and `"`
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The virtual tag name behind the legacy `host` tag
#[must_use]
pub fn canonical_tag_name(name: &str) -> &str {
    if name.eq_ignore_ascii_case("host") { HOST_TAG } else { name }
}
