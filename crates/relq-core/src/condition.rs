//! Boolean condition trees.
//!
//! Conditions are plain data: building them never touches a connection and
//! never fails. Rendering happens in the compiler, which is also where empty
//! `And`/`Or` lists disappear.
//!
//! # Example
//!
//! ```
//! use relq_core::condition::Condition;
//!
//! let active_adults = Condition::eq("status", "active")
//!     .and(Condition::gte("age", 18).or(Condition::eq("verified", true)));
//! let banned = Condition::eq("role", "banned").negate();
//! let filter = Condition::and_all([active_adults, banned]);
//! assert!(matches!(filter, Condition::And(ref items) if items.len() == 3));
//! ```

use std::fmt;

use crate::expr::{col, ColumnRef, Expr, IntoExpr, RawSql};
use crate::query::Query;
use crate::value::{SqlValue, ToSqlValue};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// LIKE
    Like,
    /// NOT LIKE
    NotLike,
    /// ILIKE
    ILike,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "<>"),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::NotLike => write!(f, "NOT LIKE"),
            Self::ILike => write!(f, "ILIKE"),
        }
    }
}

/// Which combinator `combine` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
}

/// Right-hand side of an `IN` test.
#[derive(Debug, Clone, PartialEq)]
pub enum InSource {
    /// Literal tuples, one per candidate. Each tuple has one value per column.
    Values(Vec<Vec<SqlValue>>),
    /// A sub-query producing the candidates.
    Query(Box<Query>),
    /// A raw fragment producing the candidates.
    Raw(RawSql),
}

/// A boolean condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `left op right`. Comparing with a NULL value renders `IS [NOT] NULL`.
    Compare {
        /// Left operand.
        left: Expr,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        right: Expr,
    },
    /// All items must hold. Empty means no restriction.
    And(Vec<Condition>),
    /// Any item must hold. Empty means no restriction.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// `(columns) IN source`
    In {
        /// Tested expressions.
        columns: Vec<Expr>,
        /// Candidates.
        source: InSource,
    },
    /// `EXISTS (subquery)`
    Exists(Box<Query>),
    /// A raw predicate.
    Raw(RawSql),
}

impl Condition {
    fn compare<V: ToSqlValue>(column: &str, op: CompareOp, value: V) -> Self {
        Self::Compare {
            left: col(column),
            op,
            right: Expr::Value(value.to_sql_value()),
        }
    }

    /// Creates an equality condition (column = value).
    pub fn eq<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// Creates an inequality condition (column <> value).
    pub fn ne<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// Creates a greater-than condition.
    pub fn gt<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// Creates a greater-than-or-equal condition.
    pub fn gte<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Gte, value)
    }

    /// Creates a less-than condition.
    pub fn lt<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// Creates a less-than-or-equal condition.
    pub fn lte<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::compare(column, CompareOp::Lte, value)
    }

    /// Creates a LIKE condition with a caller-supplied pattern.
    pub fn like(column: &str, pattern: &str) -> Self {
        Self::compare(column, CompareOp::Like, pattern)
    }

    /// Creates a case-insensitive ILIKE condition.
    pub fn ilike(column: &str, pattern: &str) -> Self {
        Self::compare(column, CompareOp::ILike, pattern)
    }

    /// Matches values containing `needle` (`LIKE '%needle%'`, escaped).
    #[must_use]
    pub fn contains(column: &str, needle: &str) -> Self {
        Self::like(column, &format!("%{}%", escape_like(needle)))
    }

    /// Matches values starting with `prefix`.
    #[must_use]
    pub fn starts_with(column: &str, prefix: &str) -> Self {
        Self::like(column, &format!("{}%", escape_like(prefix)))
    }

    /// Matches values ending with `suffix`.
    #[must_use]
    pub fn ends_with(column: &str, suffix: &str) -> Self {
        Self::like(column, &format!("%{}", escape_like(suffix)))
    }

    /// Creates `column >= low AND column <= high`.
    pub fn between<V: ToSqlValue>(column: &str, low: V, high: V) -> Self {
        Self::And(vec![Self::gte(column, low), Self::lte(column, high)])
    }

    /// Creates an IS NULL check.
    #[must_use]
    pub fn is_null(column: &str) -> Self {
        Self::compare(column, CompareOp::Eq, SqlValue::Null)
    }

    /// Creates an IS NOT NULL check.
    #[must_use]
    pub fn is_not_null(column: &str) -> Self {
        Self::compare(column, CompareOp::Ne, SqlValue::Null)
    }

    /// Compares two columns, e.g. `"messages.authorId" = "user.id"`.
    #[must_use]
    pub fn columns_eq(left: &str, right: &str) -> Self {
        Self::Compare {
            left: col(left),
            op: CompareOp::Eq,
            right: col(right),
        }
    }

    /// Compares two arbitrary operands.
    pub fn compare_exprs(left: impl IntoExpr, op: CompareOp, right: impl IntoExpr) -> Self {
        Self::Compare {
            left: left.into_expr(),
            op,
            right: right.into_expr(),
        }
    }

    /// Creates an IN list condition on one column.
    pub fn in_list<V: ToSqlValue>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        col(column).in_list(values)
    }

    /// Creates a multi-column IN condition over literal tuples.
    #[must_use]
    pub fn in_tuples(columns: &[&str], tuples: Vec<Vec<SqlValue>>) -> Self {
        Self::In {
            columns: columns.iter().map(|c| col(c)).collect(),
            source: InSource::Values(tuples),
        }
    }

    /// Creates a multi-column IN condition over a sub-query.
    #[must_use]
    pub fn in_query(columns: &[&str], query: Query) -> Self {
        Self::In {
            columns: columns.iter().map(|c| col(c)).collect(),
            source: InSource::Query(Box::new(query)),
        }
    }

    /// Creates an EXISTS condition.
    #[must_use]
    pub fn exists(query: Query) -> Self {
        Self::Exists(Box::new(query))
    }

    /// Creates a raw predicate. Use `$1..$n` for the given parameters.
    pub fn raw(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::Raw(RawSql::with_params(sql, params))
    }

    /// A condition that places no restriction (an empty `And`).
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Combines with another condition using AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        combine(Combinator::And, [self, other])
    }

    /// Combines with another condition using OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        combine(Combinator::Or, [self, other])
    }

    /// AND of every condition, flattened.
    pub fn and_all(conditions: impl IntoIterator<Item = Self>) -> Self {
        combine(Combinator::And, conditions)
    }

    /// OR of every condition, flattened.
    pub fn or_any(conditions: impl IntoIterator<Item = Self>) -> Self {
        combine(Combinator::Or, conditions)
    }

    /// Negates the condition. `Not(Not(x))` collapses to `x`.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Returns true when the condition renders to nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(items) | Self::Or(items) => items.iter().all(Self::is_empty),
            Self::Not(inner) => inner.is_empty(),
            _ => false,
        }
    }

    /// Qualifies every unqualified column reference with `alias`.
    ///
    /// Sub-queries are left alone since their columns belong to their own
    /// scope.
    #[must_use]
    pub fn qualify(self, alias: &str) -> Self {
        match self {
            Self::Compare { left, op, right } => Self::Compare {
                left: qualify_expr(left, alias),
                op,
                right: qualify_expr(right, alias),
            },
            Self::And(items) => Self::And(items.into_iter().map(|c| c.qualify(alias)).collect()),
            Self::Or(items) => Self::Or(items.into_iter().map(|c| c.qualify(alias)).collect()),
            Self::Not(inner) => Self::Not(Box::new(inner.qualify(alias))),
            Self::In { columns, source } => Self::In {
                columns: columns.into_iter().map(|e| qualify_expr(e, alias)).collect(),
                source,
            },
            other => other,
        }
    }
}

fn qualify_expr(expr: Expr, alias: &str) -> Expr {
    match expr {
        Expr::Column(ColumnRef { table: None, name }) => {
            Expr::Column(ColumnRef::qualified(alias, name))
        }
        other => other,
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Builds an `And`/`Or` node, flattening nested nodes of the same kind and
/// dropping empty ones. A single surviving node is returned unwrapped.
pub fn combine(kind: Combinator, nodes: impl IntoIterator<Item = Condition>) -> Condition {
    let mut flat = Vec::new();
    for node in nodes {
        match (kind, node) {
            (Combinator::And, Condition::And(items)) | (Combinator::Or, Condition::Or(items)) => {
                flat.extend(items.into_iter().filter(|c| !c.is_empty()));
            }
            (_, node) if node.is_empty() => {}
            (_, node) => flat.push(node),
        }
    }
    if flat.len() == 1 {
        if let Some(single) = flat.pop() {
            return single;
        }
    }
    match kind {
        Combinator::And => Condition::And(flat),
        Combinator::Or => Condition::Or(flat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_collapses_double_not() {
        let base = Condition::eq("deleted", true);
        let twice = base.clone().negate().negate();
        assert_eq!(twice, base);
        assert!(matches!(base.negate(), Condition::Not(_)));
    }

    #[test]
    fn test_combine_flattens_homogeneous_nodes() {
        let a = Condition::eq("a", 1);
        let b = Condition::eq("b", 2);
        let c = Condition::eq("c", 3);
        let nested = combine(
            Combinator::And,
            [a.clone(), Condition::And(vec![b.clone(), c.clone()])],
        );
        assert_eq!(nested, Condition::And(vec![a, b, c]));
    }

    #[test]
    fn test_combine_keeps_mixed_nodes() {
        let a = Condition::eq("a", 1);
        let or = Condition::Or(vec![Condition::eq("b", 2), Condition::eq("c", 3)]);
        let combined = combine(Combinator::And, [a.clone(), or.clone()]);
        assert_eq!(combined, Condition::And(vec![a, or]));
    }

    #[test]
    fn test_combine_drops_empty_and_unwraps_single() {
        let a = Condition::eq("a", 1);
        let combined = combine(Combinator::Or, [Condition::all(), a.clone()]);
        assert_eq!(combined, a);
        assert!(combine(Combinator::And, []).is_empty());
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let cond = Condition::contains("email", "50%_off");
        let Condition::Compare { right, op, .. } = cond else {
            panic!("expected comparison");
        };
        assert_eq!(op, CompareOp::Like);
        assert_eq!(right, Expr::Value(SqlValue::Text("%50\\%\\_off%".into())));
    }

    #[test]
    fn test_qualify_only_touches_unqualified_columns() {
        let cond = Condition::eq("name", "x").and(Condition::columns_eq("id", "other.id"));
        let qualified = cond.qualify("user");
        assert_eq!(
            qualified,
            Condition::And(vec![
                Condition::eq("user.name", "x"),
                Condition::columns_eq("user.id", "other.id"),
            ])
        );
    }
}
