//! Query evaluation against the tag index
//!
//! [`Node::evaluate`] turns an expression tree into an ordered list of host
//! ids without duplicates. Leaves run one SQL query each; inner nodes
//! combine their children with the bucketed set algebra of
//! [`TagIndex::combine`] and [`TagIndex::complement`].
//!
//! [`Evaluator`] is the top-level entry point. When a query matches nothing
//! it forces one cache rebuild from the tag source and evaluates the same
//! tree again. [`ReloadState`] records that the rebuild happened, so a
//! caller running several queries rebuilds at most once.

use super::ast::{BinaryOp, MatchKind, Node, TagMatch, Target, UnaryOp};
use super::error::QueryError;
use super::functions;
use super::optimize::{OptimizeOptions, optimize_fully};
use super::QueryOptions;
use crate::db::{SetOp, SqlQuery, Tables, TagIndex, dedup_ids};
use crate::source::TagSource;

/// Per-path evaluation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalContext {
    /// Never evaluate fallbacks
    pub fixed_string: bool,
    /// A glob fallback was already taken on this path
    pub did_fallback: bool,
}

impl EvalContext {
    #[must_use]
    pub const fn new(fixed_string: bool) -> Self {
        Self { fixed_string, did_fallback: false }
    }
}

/// Whether the cache was already rebuilt because a query matched nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadState {
    pub reloaded: bool,
}

impl Node {
    /// Evaluate to host ids
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if a statement fails or a function argument is invalid.
    pub fn evaluate(&self, index: &TagIndex, ctx: EvalContext) -> Result<Vec<i64>, QueryError> {
        match self {
            Self::Everything => Ok(index.all_ids()?),
            Self::Nothing => Ok(Vec::new()),
            Self::Tag(leaf) => {
                let ids = index.query_ids(&leaf.to_query())?;
                match &leaf.fallback {
                    Some(fallback) if ids.is_empty() && !ctx.fixed_string && !ctx.did_fallback => {
                        log::debug!("no exact match for {leaf}, trying {fallback}");
                        fallback.evaluate(index, EvalContext { did_fallback: true, ..ctx })
                    }
                    _ => Ok(ids),
                }
            }
            Self::Query(leaf) => {
                let ids = index.query_ids(&leaf.query)?;
                match &leaf.fallback {
                    Some(fallback) if ids.is_empty() && !ctx.fixed_string => fallback.evaluate(index, ctx),
                    _ => Ok(ids),
                }
            }
            Self::Unary { op: UnaryOp::Noop, expr } => expr.evaluate(index, ctx),
            Self::Unary { op: UnaryOp::Not, expr } => {
                let ids = expr.evaluate(index, ctx)?;
                if ids.is_empty() {
                    return Ok(index.all_ids()?);
                }
                Ok(index.complement(&ids)?)
            }
            Self::Binary { op, left, right } => {
                let left = left.evaluate(index, ctx)?;
                if *op == BinaryOp::And && left.is_empty() {
                    return Ok(left);
                }
                let right = right.evaluate(index, ctx)?;
                match op {
                    BinaryOp::And if right.is_empty() => Ok(right),
                    BinaryOp::Or | BinaryOp::Xor if left.is_empty() => Ok(right),
                    BinaryOp::Or | BinaryOp::Xor if right.is_empty() => Ok(left),
                    _ => Ok(index.combine(set_op(*op), &left, &right)?),
                }
            }
            Self::Multinary { exprs, fallback } => {
                if let Some((tables, leaves)) = same_kind_leaves(exprs) {
                    let ids = batch(tables, &leaves, index)?;
                    if !ids.is_empty() || ctx.fixed_string {
                        return Ok(ids);
                    }
                }
                if let Some(fallback) = fallback {
                    return fallback.evaluate(index, ctx);
                }
                let mut ids = Vec::new();
                for expr in exprs {
                    ids.extend(expr.evaluate(index, ctx)?);
                }
                Ok(dedup_ids(ids))
            }
            Self::Funcall { function, expr, args } => {
                let ids = expr.evaluate(index, ctx)?;
                functions::apply(*function, ids, args, index)
            }
        }
    }
}

const fn set_op(op: BinaryOp) -> SetOp {
    match op {
        BinaryOp::And => SetOp::And,
        BinaryOp::Or => SetOp::Or,
        BinaryOp::Xor => SetOp::Xor,
    }
}

/// The leaves of `exprs`, when all of them are tag leaves of one target and kind
fn same_kind_leaves(exprs: &[Node]) -> Option<(Tables, Vec<&TagMatch>)> {
    let leaves = exprs
        .iter()
        .map(|expr| match expr {
            Node::Tag(leaf) => Some(leaf),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    let (target, kind): (Target, MatchKind) = leaves.first().map(|leaf| (leaf.target, leaf.kind))?;
    leaves
        .iter()
        .all(|leaf| leaf.target == target && leaf.kind == kind)
        .then(|| (target.tables(), leaves))
}

/// One `WHERE (c1) OR (c2) …` query per group of conditions fitting the term limit
fn batch(tables: Tables, leaves: &[&TagMatch], index: &TagIndex) -> Result<Vec<i64>, QueryError> {
    let mut ids = Vec::new();
    let mut group: Vec<SqlQuery> = Vec::new();
    let mut values = 0;
    for leaf in leaves {
        let (_, condition) = leaf.condition();
        if !group.is_empty() && values + condition.param_count() > index.max_terms() {
            ids.extend(index.query_ids(&batched_query(tables, &group))?);
            group.clear();
            values = 0;
        }
        values += condition.param_count();
        group.push(condition);
    }
    if !group.is_empty() {
        ids.extend(index.query_ids(&batched_query(tables, &group))?);
    }
    Ok(dedup_ids(ids))
}

fn batched_query(tables: Tables, conditions: &[SqlQuery]) -> SqlQuery {
    let mut query = SqlQuery::new(format!("{} WHERE ", tables.select_prefix()));
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            query.push_sql(" OR ");
        }
        query.push_sql("(");
        query.append(condition);
        query.push_sql(")");
    }
    query
}

/// Runs queries against an index, rebuilding it once from `source` when a
/// query matches nothing
pub struct Evaluator<'a> {
    index: &'a mut TagIndex,
    source: &'a dyn TagSource,
    options: QueryOptions,
}

impl<'a> Evaluator<'a> {
    pub fn new(index: &'a mut TagIndex, source: &'a dyn TagSource, options: QueryOptions) -> Self {
        Self { index, source, options }
    }

    #[must_use]
    pub fn index(&self) -> &TagIndex {
        self.index
    }

    #[must_use]
    pub fn optimize_options(&self) -> OptimizeOptions {
        OptimizeOptions { fixed_string: self.options.fixed_string, max_terms: self.index.max_terms() }
    }

    /// Parse, optimize and evaluate `text`
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if the text does not parse or build, or evaluation fails.
    pub fn search(&mut self, text: &str, reload: &mut ReloadState) -> Result<Vec<i64>, QueryError> {
        let node = super::parse(text)?;
        let node = optimize_fully(&node, &self.optimize_options(), self.options.optimize_iterations);
        self.evaluate(&node, reload)
    }

    /// Evaluate `node`, rebuilding the cache and retrying once if it matches nothing
    ///
    /// # Errors
    ///
    /// Returns `QueryError` if evaluation or the rebuild fails.
    pub fn evaluate(&mut self, node: &Node, reload: &mut ReloadState) -> Result<Vec<i64>, QueryError> {
        let ctx = EvalContext::new(self.options.fixed_string);
        let ids = node.evaluate(self.index, ctx)?;
        if !ids.is_empty() || reload.reloaded || self.index.is_offline() {
            return Ok(ids);
        }
        reload.reloaded = true;
        log::info!("no hosts matched {node}, rebuilding the cache from {}", self.source.name());
        self.index.refresh(self.source, true)?;
        node.evaluate(self.index, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IndexOptions;
    use crate::query::parse;
    use crate::source::{Downtime, MemorySource, SourceError, TagMap};
    use crate::testing::{TestIndex, names};
    use std::cell::Cell;

    fn fleet() -> TestIndex {
        TestIndex::new()
            .with_tag("role:web", &["web-01", "web-02", "web-03"])
            .with_tag("role:db", &["db-01", "db-02"])
            .with_tag("role:web-server", &["edge-01"])
            .with_tag("env:prod", &["web-01", "db-01", "edge-01"])
            .with_tag("env:dev", &["web-02", "db-02"])
            .with_tag("role:foo", &["cache-01"])
            .with_tag("monitored", &["foo"])
    }

    fn run(index: &TagIndex, text: &str) -> Vec<String> {
        run_with(index, text, false)
    }

    fn run_with(index: &TagIndex, text: &str, fixed_string: bool) -> Vec<String> {
        let options = OptimizeOptions { fixed_string, max_terms: index.max_terms() };
        let node = optimize_fully(&parse(text).unwrap(), &options, 8);
        let ids = node.evaluate(index, EvalContext::new(fixed_string)).unwrap();
        let mut hosts = names(index, &ids);
        hosts.sort();
        hosts
    }

    #[test]
    fn test_tag_match() {
        let index = fleet().build();
        assert_eq!(run(&index, "role:db"), ["db-01", "db-02"]);
        assert_eq!(run(&index, "ROLE:DB"), ["db-01", "db-02"]);
        assert_eq!(run(&index, "host:web-02"), ["web-02"]);
        assert_eq!(run(&index, "monitored"), ["foo"]);
    }

    #[test]
    fn test_tag_value_matches_host_name_and_value() {
        let index = fleet().build();
        assert_eq!(run(&index, ":foo"), ["cache-01", "foo"]);
    }

    #[test]
    fn test_glob_and_regex() {
        let index = fleet().build();
        assert_eq!(run(&index, "host:db-*"), ["db-01", "db-02"]);
        assert_eq!(run(&index, "/^role$/:/^d/"), ["db-01", "db-02"]);
        assert_eq!(run(&index, "/^env$/:"), ["db-01", "db-02", "edge-01", "web-01", "web-02"]);
    }

    #[test]
    fn test_literal_falls_back_to_glob() {
        let index = fleet().build();
        assert_eq!(run(&index, "role:server"), ["edge-01"]);
        assert!(run_with(&index, "role:server", true).is_empty());
    }

    #[test]
    fn test_fallback_taken_once_per_path() {
        let index = fleet().build();
        let Node::Tag(leaf) = parse("role:nothing-here").unwrap().optimize(&OptimizeOptions::default()) else {
            panic!()
        };
        let ctx = EvalContext { fixed_string: false, did_fallback: true };
        assert!(Node::Tag(leaf).evaluate(&index, ctx).unwrap().is_empty());
    }

    #[test]
    fn test_boolean_operators() {
        let index = fleet().build();
        assert_eq!(run(&index, "role:web and env:prod"), ["web-01"]);
        assert_eq!(run(&index, "role:db or env:dev"), ["db-01", "db-02", "web-02"]);
        assert_eq!(run(&index, "role:web ^ env:dev"), ["db-02", "web-01", "web-03"]);
        assert_eq!(run(&index, "env:prod !role:web"), run(&index, "env:prod or not role:web"));
        assert!(run(&index, "role:web and role:db").is_empty());
    }

    #[test]
    fn test_not_complements_every_host() {
        let index = fleet().build();
        let everything = run(&index, "*");
        let web = run(&index, "role:web");
        let not_web = run(&index, "not role:web");
        assert_eq!(not_web.len() + web.len(), everything.len());
        assert!(not_web.iter().all(|host| !web.contains(host)));
        assert_eq!(run(&index, "not nosuch:thing"), everything);
    }

    #[test]
    fn test_or_group_batches_within_term_limit() {
        let index = fleet().with_max_terms(6).build();
        let text = "host:web-01 or host:web-02 or host:db-01 or host:db-02 or host:foo or host:edge-01 or host:cache-01";
        assert_eq!(run(&index, text).len(), 7);
        assert_eq!(run(&index, "role:web, role:db"), ["db-01", "db-02", "web-01", "web-02", "web-03"]);
    }

    #[test]
    fn test_or_group_falls_back_when_empty() {
        let index = fleet().build();
        assert_eq!(run(&index, "role:server or role:nope"), ["edge-01"]);
        assert!(run_with(&index, "role:server or role:nope", true).is_empty());
    }

    #[test]
    fn test_functions() {
        let index = fleet().build();
        let node = optimize_fully(&parse("HEAD(role:web, 2)").unwrap(), &OptimizeOptions::default(), 8);
        let all = parse("role:web").unwrap().evaluate(&index, EvalContext::default()).unwrap();
        let head = node.evaluate(&index, EvalContext::default()).unwrap();
        assert_eq!(head, all[..2]);

        assert_eq!(run(&index, "GROUP_BY(role:web or role:db, env)").len(), 2);
        assert_eq!(run(&index, "SAMPLE(role:web)").len(), 1);
        assert_eq!(run(&index, "SHUFFLE(role:db)"), ["db-01", "db-02"]);
    }

    #[test]
    fn test_order_by_tag_value() {
        let index = fleet().build();
        let node = parse("ORDER_BY(role:web or role:db, env)").unwrap();
        let ids = node.evaluate(&index, EvalContext::default()).unwrap();
        let hosts = names(&index, &ids);
        // dev before prod, hosts without the tag last
        assert_eq!(hosts[..2].iter().filter(|h| ["web-02", "db-02"].contains(&h.as_str())).count(), 2);
        assert_eq!(hosts.last().map(String::as_str), Some("web-03"));
    }

    struct CountingSource {
        inner: MemorySource,
        fetches: Cell<usize>,
    }

    impl TagSource for CountingSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn get_all_tags(&self) -> Result<TagMap, SourceError> {
            self.fetches.set(self.fetches.get() + 1);
            self.inner.get_all_tags()
        }

        fn get_all_downtimes(&self) -> Result<Vec<Downtime>, SourceError> {
            self.inner.get_all_downtimes()
        }
    }

    fn counting(inner: MemorySource) -> CountingSource {
        CountingSource { inner, fetches: Cell::new(0) }
    }

    #[test]
    fn test_empty_result_reloads_once() {
        let mut index = fleet().build();
        let source = counting(fleet().source().clone());
        let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
        let mut reload = ReloadState::default();

        assert!(evaluator.search("nonexistent:tag", &mut reload).unwrap().is_empty());
        assert!(reload.reloaded);
        assert!(evaluator.search("other:missing", &mut reload).unwrap().is_empty());
        assert_eq!(source.fetches.get(), 1);
    }

    #[test]
    fn test_reload_sees_new_hosts() {
        let mut index = fleet().build();
        let source = counting(fleet().source().clone().with_tag("role:queue", ["mq-01"]));
        let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
        let mut reload = ReloadState::default();

        let ids = evaluator.search("role:queue", &mut reload).unwrap();
        assert_eq!(names(evaluator.index(), &ids), ["mq-01"]);
    }

    #[test]
    fn test_no_reload_when_offline_or_matching() {
        let source = counting(fleet().source().clone());
        let mut index = TagIndex::open_in_memory(IndexOptions { offline: true, ..Default::default() }).unwrap();
        let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
        let mut reload = ReloadState::default();
        assert!(evaluator.search("role:web", &mut reload).unwrap().is_empty());
        assert!(!reload.reloaded);

        let mut index = fleet().build();
        let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
        assert!(!evaluator.search("role:web", &mut reload).unwrap().is_empty());
        assert_eq!(source.fetches.get(), 0);
    }

    #[test]
    fn test_search_reports_build_errors() {
        let mut index = fleet().build();
        let source = fleet().source().clone();
        let mut evaluator = Evaluator::new(&mut index, &source, QueryOptions::default());
        let mut reload = ReloadState::default();
        assert!(matches!(evaluator.search("FROB(x)", &mut reload), Err(QueryError::Build(_))));
        assert!(matches!(evaluator.search("role:web and", &mut reload), Err(QueryError::Parse(_))));
    }
}
