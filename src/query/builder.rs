//! Parse tree to expression tree
//!
//! Resolves operators and function names, strips quotes and regex slashes,
//! validates glob and regex patterns, and decides which [`Target`] each tag
//! expression compares against:
//!
//! | Shape | Target |
//! |---|---|
//! | `host:value`, `@host:value` | [`Target::Host`] |
//! | `name:value` | [`Target::Tag`] |
//! | `name:` | [`Target::Tagname`] (`host:` means `@host:`) |
//! | `token` | [`Target::AnyField`] |
//! | `:value` | [`Target::Tagvalue`] |

use super::ast::{BinaryOp, MatchKind, Node, TagMatch, Target, UnaryOp, canonical_tag_name};
use super::error::BuildError;
use super::functions::{Arg, Function};
use super::grammar::{ParseTree, TagTree, Token};
use crate::db::schema::HOST_TAG;
use regex::Regex;

/// Build the expression tree for `tree`
///
/// # Errors
///
/// Returns `BuildError` for unknown functions or operators, bad function
/// arguments and malformed glob or regex patterns.
pub fn build(tree: &ParseTree) -> Result<Node, BuildError> {
    match tree {
        ParseTree::Chain { head, tail } => {
            let mut node = build(head)?;
            for (op, term) in tail {
                node = Node::binary(binary_op(op.as_deref())?, node, build(term)?);
            }
            Ok(node)
        }
        ParseTree::Unary { op, expr } => Ok(Node::Unary { op: unary_op(op)?, expr: Box::new(build(expr)?) }),
        ParseTree::Funcall { name, args } => build_funcall(name, args),
        ParseTree::Tag(tag) => build_tag(tag),
        ParseTree::Integer(n) => Ok(any_field(MatchKind::Literal, n.to_string())),
        ParseTree::Float(x) => Ok(any_field(MatchKind::Literal, x.to_string())),
        ParseTree::Str(raw) => Ok(any_field(MatchKind::Literal, unquote(raw))),
        ParseTree::Regex(raw) => Ok(any_field(MatchKind::Regex, regex_text(raw)?)),
    }
}

fn any_field(kind: MatchKind, value: String) -> Node {
    Node::Tag(TagMatch::new(Target::AnyField, kind, None, Some(value)))
}

fn binary_op(op: Option<&str>) -> Result<BinaryOp, BuildError> {
    match op {
        None | Some("OR" | "or" | "," | "||" | "|") => Ok(BinaryOp::Or),
        Some("AND" | "and" | "&&" | "&") => Ok(BinaryOp::And),
        Some("XOR" | "xor" | "^") => Ok(BinaryOp::Xor),
        Some(other) => Err(BuildError::UnknownOperator(other.to_string())),
    }
}

fn unary_op(op: &str) -> Result<UnaryOp, BuildError> {
    match op {
        "NOT" | "not" | "!" | "~" => Ok(UnaryOp::Not),
        other => Err(BuildError::UnknownOperator(other.to_string())),
    }
}

fn build_tag(tag: &TagTree) -> Result<Node, BuildError> {
    let tokens = || tag.name.iter().chain(tag.value.iter());
    let kind = if tokens().any(Token::is_regex) {
        MatchKind::Regex
    } else if tokens().any(Token::is_glob) {
        MatchKind::Glob
    } else {
        MatchKind::Literal
    };
    let name = tag.name.as_ref().map(token_text).transpose()?;
    let value = tag.value.as_ref().map(token_text).transpose()?;

    let leaf = match (name, tag.separator, value) {
        (Some(name), Some(separator), Some(value)) => {
            let is_host = name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case(HOST_TAG);
            let target = if kind != MatchKind::Regex && is_host {
                Target::Host
            } else {
                Target::Tag
            };
            TagMatch { separator: Some(separator), ..TagMatch::new(target, kind, Some(name), Some(value)) }
        }
        (Some(name), Some(separator), None) => {
            let name = canonical_tag_name(&name).to_string();
            TagMatch { separator: Some(separator), ..TagMatch::new(Target::Tagname, kind, Some(name), None) }
        }
        (Some(token), None, None) => TagMatch::new(Target::AnyField, kind, None, Some(token)),
        (None, Some(separator), Some(value)) => {
            TagMatch { separator: Some(separator), ..TagMatch::new(Target::Tagvalue, kind, None, Some(value)) }
        }
        _ => {
            return Err(BuildError::InvalidPattern {
                pattern: String::new(),
                message: "incomplete tag expression".to_string(),
            });
        }
    };
    Ok(Node::Tag(leaf))
}

fn token_text(token: &Token) -> Result<String, BuildError> {
    match token {
        Token::Literal(text) => Ok(text.clone()),
        Token::Glob(text) => {
            check_glob(text)?;
            Ok(text.clone())
        }
        Token::Str(raw) => Ok(unquote(raw)),
        Token::Regex(raw) => regex_text(raw),
    }
}

/// Reject patterns SQLite's `GLOB` cannot match as written
///
/// Only character classes need checking: `[` opens one, an optional `^`
/// negates it, and a `]` right after the opening is part of the class.
fn check_glob(text: &str) -> Result<(), BuildError> {
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '[' {
            continue;
        }
        let mut class = chars.clone().peekable();
        let mut consumed = 0;
        if class.next_if_eq(&'^').is_some() {
            consumed += 1;
        }
        if class.next_if_eq(&']').is_some() {
            consumed += 1;
        }
        let Some(len) = class.position(|c| c == ']') else {
            return Err(BuildError::InvalidPattern {
                pattern: text.to_string(),
                message: "unclosed character class".to_string(),
            });
        };
        chars.nth(consumed + len);
    }
    Ok(())
}

/// Strip surrounding quotes and resolve backslash escapes
fn unquote(raw: &str) -> String {
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
    let mut text = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => text.extend(chars.next()),
            c => text.push(c),
        }
    }
    text
}

/// Strip surrounding slashes, unescape `\/` and check the pattern compiles
fn regex_text(raw: &str) -> Result<String, BuildError> {
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or_default();
    let text = inner.replace("\\/", "/");
    Regex::new(&text).map_err(|e| BuildError::InvalidPattern { pattern: text.clone(), message: e.to_string() })?;
    Ok(text)
}

fn build_funcall(name: &str, args: &[ParseTree]) -> Result<Node, BuildError> {
    let sample = name.eq_ignore_ascii_case("SAMPLE");
    let function = match Function::from_name(name) {
        Some(function) => function,
        None if sample => Function::Head,
        None => return Err(BuildError::UnknownFunction(name.to_string())),
    };
    let invalid = |message: &str| BuildError::InvalidArgument {
        function: name.to_ascii_uppercase(),
        message: message.to_string(),
    };

    let (target, rest) = args.split_first().ok_or_else(|| invalid("missing target expression"))?;
    let mut expr = build(target)?;

    let args: Vec<Arg> = if function.takes_tag() {
        let max = if function == Function::GroupBy { 1 } else { 0 };
        if rest.len() < max || rest.len() > 1 {
            let message = if max == 1 { "expected exactly one tag name" } else { "expected at most one tag name" };
            return Err(invalid(message));
        }
        rest.iter()
            .map(|arg| tag_arg(arg).ok_or_else(|| invalid("expected a tag name")))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let (min, max) = match function {
            Function::Head | Function::Tail => (0, 1),
            Function::Slice => (1, 2),
            _ => (0, 0),
        };
        if rest.len() < min || rest.len() > max {
            return Err(invalid(&format!("expected {min} to {max} count arguments, got {}", rest.len())));
        }
        rest.iter()
            .map(|arg| match arg {
                ParseTree::Integer(n) if *n >= 0 => Ok(Arg::Integer(*n)),
                _ => Err(invalid("expected a non-negative integer")),
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    if sample {
        expr = Node::Funcall { function: Function::Shuffle, expr: Box::new(expr), args: Vec::new() };
    }
    Ok(Node::Funcall { function, expr: Box::new(expr), args })
}

fn tag_arg(arg: &ParseTree) -> Option<Arg> {
    match arg {
        ParseTree::Str(raw) => Some(Arg::Str(unquote(raw))),
        ParseTree::Tag(_) => build(arg).ok().map(|node| Arg::Node(Box::new(node))),
        _ => None,
    }
}
