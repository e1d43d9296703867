//! Bucketed set algebra over host ids
//!
//! Combining two already evaluated id lists (or complementing one) is done
//! by SQLite, but a single statement may only bind `max_terms` values. The
//! host id space `[min_id, max_id]` is therefore cut into half-open buckets
//! `[k·size, (k+1)·size)`, where `size` leaves room for the two range bounds
//! plus every id the operator has to bind for that bucket:
//!
//! | operator | values per bucket | size |
//! |---|---|---|
//! | NOT | `2 + n` | `max_terms - 2` |
//! | AND, OR | `2 + l + r` | `(max_terms - 2) / 2` |
//! | XOR | `2 + 2·(l + r)` | `(max_terms - 2) / 4` |
//!
//! Each id falls in exactly one bucket, so concatenating the per-bucket
//! results gives the exact set result, ascending by id.

use super::query::SqlQuery;
use super::{DbError, TagIndex};
use rusqlite::types::Value;

/// Range bounds bound by every bucket query
const RANGE_PARAMS: usize = 2;

/// Binary set operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    And,
    Or,
    Xor,
}

impl SetOp {
    const fn factor(self) -> usize {
        match self {
            Self::And | Self::Or => 2,
            Self::Xor => 4,
        }
    }
}

impl TagIndex {
    /// Every host id not in `ids`, ascending
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a bucket query fails.
    pub fn complement(&self, ids: &[i64]) -> Result<Vec<i64>, DbError> {
        let Some((min, max)) = self.id_range()? else {
            return Ok(Vec::new());
        };
        let sorted = sorted_unique(ids);
        let mut result = Vec::new();
        for (lo, hi) in buckets(min, max, bucket_size(self.max_terms(), 1)) {
            let excluded = in_range(&sorted, lo, hi);
            let mut query = range_query(lo, hi);
            if !excluded.is_empty() {
                query.push_sql(" AND NOT (");
                query.append(&SqlQuery::in_list("id", excluded));
                query.push_sql(")");
            }
            query.push_sql(" ORDER BY id");
            result.extend(self.query_ids(&query)?);
        }
        Ok(result)
    }

    /// Combine two id lists with `op`, ascending
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a bucket query fails.
    pub fn combine(&self, op: SetOp, left: &[i64], right: &[i64]) -> Result<Vec<i64>, DbError> {
        if op == SetOp::And && (left.is_empty() || right.is_empty()) {
            return Ok(Vec::new());
        }
        let Some((min, max)) = self.id_range()? else {
            return Ok(Vec::new());
        };
        let left = sorted_unique(left);
        let right = sorted_unique(right);
        let mut result = Vec::new();
        for (lo, hi) in buckets(min, max, bucket_size(self.max_terms(), op.factor())) {
            let l = in_range(&left, lo, hi);
            let r = in_range(&right, lo, hi);
            let skip = match op {
                SetOp::And => l.is_empty() || r.is_empty(),
                SetOp::Or | SetOp::Xor => l.is_empty() && r.is_empty(),
            };
            if skip {
                continue;
            }
            let mut query = range_query(lo, hi);
            query.push_sql(" AND ");
            query.append(&membership(op, l, r));
            query.push_sql(" ORDER BY id");
            result.extend(self.query_ids(&query)?);
        }
        Ok(result)
    }
}

fn membership(op: SetOp, left: &[i64], right: &[i64]) -> SqlQuery {
    let in_left = SqlQuery::in_list("id", left);
    let in_right = SqlQuery::in_list("id", right);
    let mut query = SqlQuery::new("(");
    match op {
        SetOp::And => {
            query.append(&in_left);
            query.push_sql(" AND ");
            query.append(&in_right);
        }
        SetOp::Or => {
            query.append(&in_left);
            query.push_sql(" OR ");
            query.append(&in_right);
        }
        SetOp::Xor => {
            query.push_sql("NOT (");
            query.append(&in_left);
            query.push_sql(" AND ");
            query.append(&in_right);
            query.push_sql(") AND (");
            query.append(&in_left);
            query.push_sql(" OR ");
            query.append(&in_right);
            query.push_sql(")");
        }
    }
    query.push_sql(")");
    query
}

fn range_query(lo: i64, hi: i64) -> SqlQuery {
    SqlQuery::with_values(
        "SELECT id FROM hosts WHERE ? <= id AND id < ?",
        vec![Value::Integer(lo), Value::Integer(hi)],
    )
}

fn bucket_size(max_terms: usize, factor: usize) -> i64 {
    let size = (max_terms.saturating_sub(RANGE_PARAMS) / factor).max(1);
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Half-open `[lo, hi)` buckets of `size` covering `[min, max]`
fn buckets(min: i64, max: i64, size: i64) -> impl Iterator<Item = (i64, i64)> {
    (min.div_euclid(size)..=max.div_euclid(size)).map(move |k| (k * size, (k + 1) * size))
}

fn in_range(sorted: &[i64], lo: i64, hi: i64) -> &[i64] {
    let start = sorted.partition_point(|id| *id < lo);
    let end = sorted.partition_point(|id| *id < hi);
    &sorted[start..end]
}

fn sorted_unique(ids: &[i64]) -> Vec<i64> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}
