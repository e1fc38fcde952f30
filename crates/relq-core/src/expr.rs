//! Column references, raw fragments and scalar expressions.
//!
//! These are the leaves of the condition tree and of select lists.

use crate::aggregate::Aggregate;
use crate::condition::{CompareOp, Condition, InSource};
use crate::query::Query;
use crate::value::{SqlValue, ToSqlValue};

/// A reference to a column, optionally qualified by a table alias.
///
/// The name is the application-facing key. When the owning query carries a
/// column shape, the compiler swaps it for the database-side name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Alias of the table the column belongs to.
    pub table: Option<String>,
    /// Column key.
    pub name: String,
}

impl ColumnRef {
    /// Creates an unqualified column reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// Creates a column reference qualified by a table alias.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Parses `"column"` or `"alias.column"`.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((table, name)) => Self::qualified(table, name),
            None => Self::new(path),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// A raw SQL fragment with its own parameters.
///
/// Placeholders inside the text are written `$1..$n` relative to `params`.
/// The compiler renumbers them into the statement-wide sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    /// SQL text.
    pub text: String,
    /// Parameters referenced by the local placeholders.
    pub params: Vec<SqlValue>,
}

impl RawSql {
    /// Creates a fragment without parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(text: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference.
    Column(ColumnRef),
    /// A bound value.
    Value(SqlValue),
    /// A raw fragment.
    Raw(RawSql),
    /// A scalar sub-query.
    SubQuery(Box<Query>),
    /// An aggregate call.
    Aggregate(Box<Aggregate>),
}

/// Creates a column expression from `"column"` or `"alias.column"`.
#[must_use]
pub fn col(path: &str) -> Expr {
    Expr::Column(ColumnRef::parse(path))
}

/// Creates a value expression.
pub fn val(value: impl ToSqlValue) -> Expr {
    Expr::Value(value.to_sql_value())
}

/// Creates a raw expression without parameters.
pub fn raw(text: impl Into<String>) -> Expr {
    Expr::Raw(RawSql::new(text))
}

/// Conversion into the right-hand side of a comparison.
pub trait IntoExpr {
    /// Converts into an expression.
    fn into_expr(self) -> Expr;
}

impl<T: ToSqlValue> IntoExpr for T {
    fn into_expr(self) -> Expr {
        Expr::Value(self.to_sql_value())
    }
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for ColumnRef {
    fn into_expr(self) -> Expr {
        Expr::Column(self)
    }
}

impl IntoExpr for Query {
    fn into_expr(self) -> Expr {
        Expr::SubQuery(Box::new(self))
    }
}

impl IntoExpr for Aggregate {
    fn into_expr(self) -> Expr {
        Expr::Aggregate(Box::new(self))
    }
}

impl Expr {
    fn compare(self, op: CompareOp, right: impl IntoExpr) -> Condition {
        Condition::Compare {
            left: self,
            op,
            right: right.into_expr(),
        }
    }

    /// `self = right`
    #[must_use]
    pub fn eq(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Eq, right)
    }

    /// `self <> right`
    #[must_use]
    pub fn ne(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Ne, right)
    }

    /// `self < right`
    #[must_use]
    pub fn lt(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Lt, right)
    }

    /// `self <= right`
    #[must_use]
    pub fn lte(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Lte, right)
    }

    /// `self > right`
    #[must_use]
    pub fn gt(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Gt, right)
    }

    /// `self >= right`
    #[must_use]
    pub fn gte(self, right: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Gte, right)
    }

    /// `self LIKE pattern`
    #[must_use]
    pub fn like(self, pattern: impl IntoExpr) -> Condition {
        self.compare(CompareOp::Like, pattern)
    }

    /// `self IS NULL`
    #[must_use]
    pub fn is_null(self) -> Condition {
        self.compare(CompareOp::Eq, SqlValue::Null)
    }

    /// `self IS NOT NULL`
    #[must_use]
    pub fn is_not_null(self) -> Condition {
        self.compare(CompareOp::Ne, SqlValue::Null)
    }

    /// `self IN (values...)`
    #[must_use]
    pub fn in_list<V: ToSqlValue>(self, values: impl IntoIterator<Item = V>) -> Condition {
        Condition::In {
            columns: vec![self],
            source: InSource::Values(
                values
                    .into_iter()
                    .map(|v| vec![v.to_sql_value()])
                    .collect(),
            ),
        }
    }

    /// `self IN (SELECT ...)`
    #[must_use]
    pub fn in_query(self, query: Query) -> Condition {
        Condition::In {
            columns: vec![self],
            source: InSource::Query(Box::new(query)),
        }
    }
}
