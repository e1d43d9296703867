//! Typed SQL query composition
//!
//! Every statement the engine runs is an [`SqlQuery`]: SQL text plus the
//! ordered values bound to its `?` placeholders. Queries are composed from
//! fragments instead of formatted strings, so the placeholder count always
//! equals the number of bound values.
//!
//! SQLite limits how many terms a single compound statement may use. All
//! multi-value statements are therefore split with [`paginate`], which yields
//! groups no larger than the term limit minus the structural parameters the
//! statement already carries.

use rusqlite::types::Value;
use std::slice::Chunks;

/// Default maximum number of terms usable in one compound statement
pub const MAX_TERMS: usize = 500;

/// Smallest term limit the bucketed set algebra can work with
pub const MIN_TERMS: usize = 6;

/// SQL text together with its bound values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlQuery {
    sql: String,
    values: Vec<Value>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), values: Vec::new() }
    }

    pub fn with_values(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self { sql: sql.into(), values }
    }

    /// `column IN (?, ?, …)` over `ids`; an empty list becomes the constant `0`
    #[must_use]
    pub fn in_list(column: &str, ids: &[i64]) -> Self {
        if ids.is_empty() {
            return Self::new("0");
        }
        Self {
            sql: format!("{column} IN ({})", placeholders(ids.len())),
            values: ids.iter().copied().map(Value::Integer).collect(),
        }
    }

    /// Join two queries with a compound operator such as `INTERSECT`
    #[must_use]
    pub fn compound(left: &Self, keyword: &str, right: &Self) -> Self {
        let mut query = left.clone();
        query.push_sql(&format!(" {keyword} "));
        query.append(right);
        query
    }

    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn bind(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    /// Append another fragment's text and values
    pub fn append(&mut self, other: &Self) {
        self.sql.push_str(&other.sql);
        self.values.extend(other.values.iter().cloned());
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn param_count(&self) -> usize {
        self.values.len()
    }
}

/// `?, ?, …` with `n` placeholders
#[must_use]
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Split `items` into groups that fit in one statement
///
/// `overhead` is the number of parameters the statement binds besides the
/// paginated items. Groups always hold at least one item.
pub fn paginate<T>(items: &[T], max_terms: usize, overhead: usize) -> Chunks<'_, T> {
    items.chunks(max_terms.saturating_sub(overhead).max(1))
}
