//! Expression tree optimizer
//!
//! Rewrites are pure and applied bottom-up: children are optimized first,
//! then the node itself.
//!
//! 1. `NOT *` is nothing, `NOT nothing` is `*`, double negation and `NOOP` vanish
//! 2. `AND` absorbs `*`, collapses on nothing and on identical operands
//! 3. `OR` collapses on `*`, drops nothing and identical operands
//! 4. `x XOR x` is nothing, `nothing XOR x` is `x`
//! 5. `OR` of two leaves of the same kind, or with an OR group, becomes one
//!    [`Node::Multinary`] group, keeping the binary form as fallback
//! 6. A binary node over two storable operands compiles into one compound
//!    query (`INTERSECT`, `UNION`, or `UNION … EXCEPT … INTERSECT …` for
//!    XOR) when its bound values fit the term limit, keeping the binary form
//!    as fallback
//! 7. Literal leaves get a glob fallback unless in fixed-string mode
//! 8. Tag name arguments of `ORDER_BY` and `GROUP_BY` are reduced to strings
//!
//! Fallbacks are never optimized again, so repeated passes reach a fixed
//! point; [`optimize_fully`] stops there or after a bounded number of passes.

use super::ast::{BinaryOp, MatchKind, Node, QueryLeaf, TagMatch, UnaryOp};
use super::functions::Arg;
use crate::db::{MAX_TERMS, SqlQuery};

/// Default bound of [`optimize_fully`] passes
pub const DEFAULT_ITERATIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Never attach glob fallbacks to literal leaves
    pub fixed_string: bool,
    /// Most values one compiled query may bind
    pub max_terms: usize,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self { fixed_string: false, max_terms: MAX_TERMS }
    }
}

/// Optimize `node` until it stops changing, at most `iterations` times
#[must_use]
pub fn optimize_fully(node: &Node, options: &OptimizeOptions, iterations: usize) -> Node {
    let mut current = node.clone();
    for pass in 1..=iterations {
        let next = current.optimize(options);
        if next == current {
            log::debug!("optimizer reached a fixed point after {pass} passes");
            break;
        }
        current = next;
    }
    log::debug!("optimized query: {current}");
    current
}

impl Node {
    /// One optimizer pass
    #[must_use]
    pub fn optimize(&self, options: &OptimizeOptions) -> Self {
        match self {
            Self::Everything | Self::Nothing | Self::Query(_) => self.clone(),
            Self::Tag(leaf) => Self::Tag(optimize_leaf(leaf, options)),
            Self::Unary { op, expr } => optimize_unary(*op, expr.optimize(options)),
            Self::Binary { op, left, right } => {
                optimize_binary(*op, left.optimize(options), right.optimize(options), options)
            }
            Self::Multinary { exprs, fallback } => Self::Multinary {
                exprs: exprs.iter().map(|expr| expr.optimize(options)).collect(),
                fallback: fallback.clone(),
            },
            Self::Funcall { function, expr, args } => Self::Funcall {
                function: *function,
                expr: Box::new(expr.optimize(options)),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Node(_) if function.takes_tag() => {
                            arg.as_tag_name().map_or_else(|| arg.clone(), |name| Arg::Str(name.to_string()))
                        }
                        _ => arg.clone(),
                    })
                    .collect(),
            },
        }
    }

    const fn is_everything(&self) -> bool {
        matches!(self, Self::Everything)
    }

    const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

fn optimize_leaf(leaf: &TagMatch, options: &OptimizeOptions) -> TagMatch {
    if leaf.kind != MatchKind::Literal || leaf.fallback.is_some() || options.fixed_string {
        return leaf.clone();
    }
    TagMatch { fallback: Some(Box::new(Node::Tag(leaf.glob_fallback()))), ..leaf.clone() }
}

fn optimize_unary(op: UnaryOp, expr: Node) -> Node {
    match (op, expr) {
        (UnaryOp::Noop, expr) => expr,
        (UnaryOp::Not, Node::Everything) => Node::Nothing,
        (UnaryOp::Not, Node::Nothing) => Node::Everything,
        (UnaryOp::Not, Node::Unary { op: UnaryOp::Not, expr }) => *expr,
        (UnaryOp::Not, expr) => Node::not(expr),
    }
}

fn optimize_binary(op: BinaryOp, left: Node, right: Node, options: &OptimizeOptions) -> Node {
    match op {
        BinaryOp::And => {
            if left.is_nothing() || right.is_nothing() {
                return Node::Nothing;
            }
            if left.is_everything() {
                return right;
            }
            if right.is_everything() || left == right {
                return left;
            }
        }
        BinaryOp::Or => {
            if left.is_everything() || right.is_everything() {
                return Node::Everything;
            }
            if left.is_nothing() {
                return right;
            }
            if right.is_nothing() || left == right {
                return left;
            }
            if groupable(&left, &right) {
                let mut exprs = or_operands(&left);
                exprs.extend(or_operands(&right));
                let fallback = Node::binary(op, without_fallback(left), without_fallback(right));
                return Node::Multinary { exprs, fallback: Some(Box::new(fallback)) };
            }
        }
        BinaryOp::Xor => {
            if left == right {
                return Node::Nothing;
            }
            if left.is_nothing() {
                return right;
            }
            if right.is_nothing() {
                return left;
            }
        }
    }
    compile(op, &left, &right, options).unwrap_or_else(|| Node::binary(op, left, right))
}

fn groupable(left: &Node, right: &Node) -> bool {
    match (left, right) {
        (Node::Multinary { .. }, _) | (_, Node::Multinary { .. }) => true,
        (Node::Tag(l), Node::Tag(r)) => l.target == r.target && l.kind == r.kind,
        _ => false,
    }
}

fn or_operands(node: &Node) -> Vec<Node> {
    match node {
        Node::Multinary { exprs, .. } => exprs.clone(),
        other => vec![other.clone()],
    }
}

/// A grouped operand as it appears inside a new group's fallback
///
/// Its own fallback is dropped so that a chain of n ORs stays linear in size.
fn without_fallback(node: Node) -> Node {
    match node {
        Node::Multinary { exprs, .. } => Node::Multinary { exprs, fallback: None },
        other => other,
    }
}

/// Compile `left op right` into one compound query
fn compile(op: BinaryOp, left: &Node, right: &Node, options: &OptimizeOptions) -> Option<Node> {
    let l = left.storable_query()?;
    let r = right.storable_query()?;
    let values = l.param_count() + r.param_count();
    let values = if op == BinaryOp::Xor { values * 2 } else { values };
    if values > options.max_terms {
        return None;
    }

    // compound operators associate to the left, so only the right side
    // needs its own subquery
    let r = match right {
        Node::Query(_) => subquery(&r),
        _ => r,
    };
    let query = match op {
        BinaryOp::And => SqlQuery::compound(&l, "INTERSECT", &r),
        BinaryOp::Or => SqlQuery::compound(&l, "UNION", &r),
        BinaryOp::Xor => {
            let mut query = SqlQuery::new("SELECT host_id FROM (");
            query.append(&SqlQuery::compound(&l, "UNION", &r));
            query.push_sql(") EXCEPT SELECT host_id FROM (");
            query.append(&SqlQuery::compound(&l, "INTERSECT", &r));
            query.push_sql(")");
            query
        }
    };
    Some(Node::Query(QueryLeaf {
        query,
        fallback: Some(Box::new(Node::binary(op, left.clone(), right.clone()))),
    }))
}

fn subquery(query: &SqlQuery) -> SqlQuery {
    let mut wrapped = SqlQuery::new("SELECT host_id FROM (");
    wrapped.append(query);
    wrapped.push_sql(")");
    wrapped
}
