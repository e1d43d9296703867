//! Query language grammar
//!
//! Turns query text into an untyped [`ParseTree`]. The grammar, PEG style:
//!
//! ```text
//! expression := term (binary_op? term)*
//! term       := unary_op term | primary
//! primary    := '(' expression ')' | funcall | tag_expr
//! funcall    := identifier '(' (arg (',' arg)*)? ')'
//! arg        := scalar &(',' | ')') | expression      # ',' is not an operator here
//! tag_expr   := token sep token | token sep | token | sep token
//! ```
//!
//! Operators are `AND and && &`, `OR or , || |`, `XOR xor ^` and the unary
//! `NOT not ! ~`. Keywords are case-sensitive and only count as keywords
//! when not followed by another tag character, so `android` is a tag. Two
//! terms with no operator between them are joined by an implicit operator
//! (`None` in [`ParseTree::Chain`]).
//!
//! A token is a bare word (a glob when it contains `* ? [ ]`), a quoted
//! string or a `/regex/`. Regex tokens cannot be mixed with other tokens in
//! one tag expression. Values may contain the separators `:` and `=`.
//!
//! Tokens keep their raw text (quotes, slashes and escapes); unquoting is
//! done when the expression tree is built.

use super::error::ParseError;
use nom::branch::alt;
use nom::bytes::complete::{escaped, is_a, is_not, tag, take_while, take_while1};
use nom::character::complete::{anychar, char, digit1, multispace0, one_of, satisfy};
use nom::combinator::{all_consuming, cut, map, map_res, not, opt, peek, recognize, verify};
use nom::error::{ContextError, ErrorKind, ParseError as _, VerboseError, context};
use nom::multi::{many1, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

/// Deepest nesting of parentheses, unary operators and function calls
pub const MAX_NESTING: usize = 128;

/// Keyword spellings of the binary operators
pub const BINARY_KEYWORDS: [&str; 6] = ["AND", "and", "OR", "or", "XOR", "xor"];

/// Keyword spellings of the unary operators
pub const UNARY_KEYWORDS: [&str; 2] = ["NOT", "not"];

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Untyped parse tree
#[derive(Debug, Clone, PartialEq)]
pub enum ParseTree {
    /// `head op term op term …`; `None` marks juxtaposition
    Chain {
        head: Box<ParseTree>,
        tail: Vec<(Option<String>, ParseTree)>,
    },
    Unary {
        op: String,
        expr: Box<ParseTree>,
    },
    Funcall {
        name: String,
        args: Vec<ParseTree>,
    },
    Tag(TagTree),
    Integer(i64),
    Float(f64),
    /// Quoted string, quotes included
    Str(String),
    /// Regex, slashes included
    Regex(String),
}

/// A tag expression: any of name, separator and value may be absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTree {
    pub name: Option<Token>,
    pub separator: Option<char>,
    pub value: Option<Token>,
}

impl TagTree {
    fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.name.iter().chain(self.value.iter())
    }

    fn mixes_regex(&self) -> bool {
        self.tokens().any(Token::is_regex) && self.tokens().any(|token| !token.is_regex())
    }
}

/// One raw token of a tag expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Glob(String),
    Str(String),
    Regex(String),
}

impl Token {
    #[must_use]
    pub const fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }

    #[must_use]
    pub const fn is_glob(&self) -> bool {
        matches!(self, Self::Glob(_))
    }
}

/// Whether `word` is an operator keyword
#[must_use]
pub fn is_keyword(word: &str) -> bool {
    BINARY_KEYWORDS.contains(&word) || UNARY_KEYWORDS.contains(&word)
}

/// Characters of a bare tag name
#[must_use]
pub fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !"&|,^!~():=*?[]/\"'".contains(c)
}

/// Characters of a bare tag value, which may contain separators
#[must_use]
pub fn is_value_char(c: char) -> bool {
    is_name_char(c) || c == ':' || c == '='
}

#[must_use]
pub fn is_glob_char(c: char) -> bool {
    matches!(c, '*' | '?' | '[' | ']')
}

/// Parse a whole query
///
/// # Errors
///
/// Returns `ParseError` if the text is not a valid query or has trailing input.
pub fn parse(input: &str) -> Result<ParseTree, ParseError> {
    let result = all_consuming(delimited(multispace0, |i| expression(i, 0, false), multispace0))(input);
    match result {
        Ok((_, tree)) => Ok(tree),
        Err(nom::Err::Error(error) | nom::Err::Failure(error)) => Err(ParseError::from_verbose(input, error)),
        Err(nom::Err::Incomplete(_)) => {
            let end = &input[input.len()..];
            Err(ParseError::from_verbose(input, VerboseError::from_error_kind(end, ErrorKind::Eof)))
        }
    }
}

fn expression(input: &str, depth: usize, in_args: bool) -> Res<'_, ParseTree> {
    let (mut input, head) = term(input, depth)?;
    let mut tail = Vec::new();
    loop {
        let (rest, op) = opt(preceded(multispace0, |i| binary_op(i, in_args)))(input)?;
        let parsed = match op {
            Some(_) => cut(preceded(multispace0, |i| term(i, depth)))(rest),
            None => preceded(multispace0, |i| term(i, depth))(input),
        };
        match parsed {
            Ok((rest, next)) => {
                tail.push((op.map(str::to_string), next));
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(error) => return Err(error),
        }
    }
    if tail.is_empty() {
        return Ok((input, head));
    }
    Ok((input, ParseTree::Chain { head: Box::new(head), tail }))
}

fn term(input: &str, depth: usize) -> Res<'_, ParseTree> {
    if depth >= MAX_NESTING {
        let error = VerboseError::from_error_kind(input, ErrorKind::TooLarge);
        return Err(nom::Err::Failure(VerboseError::add_context(input, "nesting too deep", error)));
    }
    alt((
        map(
            pair(terminated(unary_op, multispace0), cut(|i| term(i, depth + 1))),
            |(op, expr)| ParseTree::Unary { op: op.to_string(), expr: Box::new(expr) },
        ),
        |i| primary(i, depth),
    ))(input)
}

fn primary(input: &str, depth: usize) -> Res<'_, ParseTree> {
    alt((
        |i| group(i, depth + 1),
        |i| funcall(i, depth + 1),
        map(tag_expr, ParseTree::Tag),
    ))(input)
}

fn group(input: &str, depth: usize) -> Res<'_, ParseTree> {
    preceded(
        char('('),
        cut(context(
            "group",
            delimited(multispace0, |i| expression(i, depth, false), preceded(multispace0, char(')'))),
        )),
    )(input)
}

fn funcall(input: &str, depth: usize) -> Res<'_, ParseTree> {
    let (input, name) = terminated(verify(identifier, |name: &str| !is_keyword(name)), char('('))(input)?;
    let (input, args) = cut(context(
        "function call",
        terminated(
            delimited(
                multispace0,
                separated_list0(delimited(multispace0, char(','), multispace0), |i| argument(i, depth)),
                multispace0,
            ),
            char(')'),
        ),
    ))(input)?;
    Ok((input, ParseTree::Funcall { name: name.to_string(), args }))
}

fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn argument(input: &str, depth: usize) -> Res<'_, ParseTree> {
    alt((
        terminated(scalar, peek(preceded(multispace0, one_of(",)")))),
        |i| expression(i, depth, true),
    ))(input)
}

fn scalar(input: &str) -> Res<'_, ParseTree> {
    alt((
        map_res(recognize(tuple((opt(char('-')), digit1, char('.'), digit1))), |text: &str| {
            text.parse::<f64>().map(ParseTree::Float)
        }),
        map_res(recognize(pair(opt(char('-')), digit1)), |text: &str| {
            text.parse::<i64>().map(ParseTree::Integer)
        }),
        map(string_literal, |raw| ParseTree::Str(raw.to_string())),
        map(regex_literal, |raw| ParseTree::Regex(raw.to_string())),
    ))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(tag(word), not(satisfy(is_value_char)))
}

fn binary_op(input: &str, in_args: bool) -> Res<'_, &str> {
    let keywords = alt((
        keyword("AND"),
        keyword("and"),
        keyword("OR"),
        keyword("or"),
        keyword("XOR"),
        keyword("xor"),
    ));
    let symbols = alt((tag("&&"), tag("&"), tag("||"), tag("|"), tag("^")));
    if in_args {
        alt((keywords, symbols))(input)
    } else {
        alt((keywords, symbols, tag(",")))(input)
    }
}

fn unary_op(input: &str) -> Res<'_, &str> {
    alt((keyword("NOT"), keyword("not"), tag("!"), tag("~")))(input)
}

fn tag_expr(input: &str) -> Res<'_, TagTree> {
    context(
        "tag expression",
        terminated(
            verify(
                alt((
                    map(tuple((name_token, separator, value_token)), |(name, separator, value)| TagTree {
                        name: Some(name),
                        separator: Some(separator),
                        value: Some(value),
                    }),
                    map(pair(name_token, separator), |(name, separator)| TagTree {
                        name: Some(name),
                        separator: Some(separator),
                        value: None,
                    }),
                    map(name_token, |name| TagTree { name: Some(name), separator: None, value: None }),
                    map(pair(separator, value_token), |(separator, value)| TagTree {
                        name: None,
                        separator: Some(separator),
                        value: Some(value),
                    }),
                )),
                |tree: &TagTree| !tree.mixes_regex(),
            ),
            not(token_start),
        ),
    )(input)
}

fn separator(input: &str) -> Res<'_, char> {
    one_of(":=")(input)
}

fn token_start(input: &str) -> Res<'_, char> {
    satisfy(|c| is_value_char(c) || is_glob_char(c) || matches!(c, '"' | '\'' | '/'))(input)
}

fn name_token(input: &str) -> Res<'_, Token> {
    alt((
        map(regex_literal, |raw| Token::Regex(raw.to_string())),
        map(string_literal, |raw| Token::Str(raw.to_string())),
        verify(word(is_name_char), |token: &Token| !matches!(token, Token::Literal(text) if is_keyword(text))),
    ))(input)
}

fn value_token(input: &str) -> Res<'_, Token> {
    alt((
        map(regex_literal, |raw| Token::Regex(raw.to_string())),
        map(string_literal, |raw| Token::Str(raw.to_string())),
        word(is_value_char),
    ))(input)
}

/// A bare word of `plain` characters and glob syntax
fn word<'a>(plain: fn(char) -> bool) -> impl FnMut(&'a str) -> Res<'a, Token> {
    map(
        recognize(many1(alt((
            take_while1(plain),
            is_a("*?"),
            recognize(delimited(char('['), is_not("]"), char(']'))),
        )))),
        |text: &str| {
            if text.contains(['*', '?', '[']) {
                Token::Glob(text.to_string())
            } else {
                Token::Literal(text.to_string())
            }
        },
    )
}

fn string_literal(input: &str) -> Res<'_, &str> {
    alt((
        recognize(delimited(char('"'), opt(escaped(is_not("\\\""), '\\', anychar)), char('"'))),
        recognize(delimited(char('\''), opt(escaped(is_not("\\'"), '\\', anychar)), char('\''))),
    ))(input)
}

fn regex_literal(input: &str) -> Res<'_, &str> {
    recognize(delimited(char('/'), opt(escaped(is_not("\\/"), '\\', anychar)), char('/')))(input)
}
