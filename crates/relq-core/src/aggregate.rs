//! Aggregate function calls for select lists and `HAVING` clauses.

use crate::condition::Condition;
use crate::expr::{col, Expr};

/// Aggregate function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    /// `count`
    Count,
    /// `sum`
    Sum,
    /// `avg`
    Avg,
    /// `max`
    Max,
    /// `min`
    Min,
    /// `json_agg`
    JsonAgg,
}

impl AggregateFn {
    /// Returns the SQL function name.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
            Self::JsonAgg => "json_agg",
        }
    }
}

/// An aggregate call such as `count(DISTINCT "t"."c") FILTER (WHERE ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Function to call.
    pub function: AggregateFn,
    /// Argument; `None` renders `*`.
    pub arg: Option<Expr>,
    /// Whether to aggregate only distinct values.
    pub distinct: bool,
    /// Optional `FILTER (WHERE ...)` condition.
    pub filter: Option<Condition>,
}

impl Aggregate {
    fn of(function: AggregateFn, column: &str) -> Self {
        Self {
            function,
            arg: Some(col(column)),
            distinct: false,
            filter: None,
        }
    }

    /// Creates a `count(*)` aggregate.
    #[must_use]
    pub const fn count_all() -> Self {
        Self {
            function: AggregateFn::Count,
            arg: None,
            distinct: false,
            filter: None,
        }
    }

    /// Creates a `count(column)` aggregate.
    #[must_use]
    pub fn count(column: &str) -> Self {
        Self::of(AggregateFn::Count, column)
    }

    /// Creates a `count(DISTINCT column)` aggregate.
    #[must_use]
    pub fn count_distinct(column: &str) -> Self {
        Self {
            distinct: true,
            ..Self::of(AggregateFn::Count, column)
        }
    }

    /// Creates a `sum(column)` aggregate.
    #[must_use]
    pub fn sum(column: &str) -> Self {
        Self::of(AggregateFn::Sum, column)
    }

    /// Creates an `avg(column)` aggregate.
    #[must_use]
    pub fn avg(column: &str) -> Self {
        Self::of(AggregateFn::Avg, column)
    }

    /// Creates a `max(column)` aggregate.
    #[must_use]
    pub fn max(column: &str) -> Self {
        Self::of(AggregateFn::Max, column)
    }

    /// Creates a `min(column)` aggregate.
    #[must_use]
    pub fn min(column: &str) -> Self {
        Self::of(AggregateFn::Min, column)
    }

    /// Adds a `FILTER (WHERE ...)` clause.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(condition);
        self
    }
}
