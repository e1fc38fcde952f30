//! The query descriptor.
//!
//! A [`Query`] accumulates everything one statement needs: target table,
//! select list, conditions, joins, ordering, grouping, paging and at most one
//! write intent. Builder methods consume the descriptor and return a new one,
//! so a descriptor that was cloned before a call is never affected by it. The
//! `add_*` methods mutate in place and exist for callers that assemble a
//! descriptor step by step.
//!
//! # Example
//!
//! ```
//! use relq_core::{Condition, OrderBy, Query};
//!
//! let sql = Query::table("user")
//!     .select_columns(&["id", "name"])
//!     .filter(Condition::eq("active", true))
//!     .order_by(OrderBy::parse("-createdAt"))
//!     .limit(10)
//!     .compile()
//!     .unwrap();
//!
//! assert_eq!(
//!     sql.text,
//!     "SELECT \"id\", \"name\" FROM \"user\" WHERE \"user\".\"active\" = $1 \
//!      ORDER BY \"user\".\"createdAt\" DESC LIMIT 10"
//! );
//! ```

use std::fmt;
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::compiler::{self, Sql};
use crate::condition::{combine, Combinator, Condition};
use crate::error::{QueryError, Result};
use crate::expr::{col, ColumnRef, Expr, RawSql};
use crate::value::{SqlValue, ToSqlValue};

/// Mapping from application-facing column keys to database column names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnShape {
    columns: Vec<(String, String)>,
}

impl ColumnShape {
    /// Creates an empty shape.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Adds a column whose database name equals its key.
    #[must_use]
    pub fn column(mut self, key: &str) -> Self {
        self.columns.push((key.to_string(), key.to_string()));
        self
    }

    /// Adds a column stored under a different database name.
    #[must_use]
    pub fn renamed(mut self, key: &str, db_name: &str) -> Self {
        self.columns.push((key.to_string(), db_name.to_string()));
        self
    }

    /// Returns the database name for a key, if the key is known.
    #[must_use]
    pub fn db_name(&self, key: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, db)| db.as_str())
    }

    /// Returns true when at least one column is renamed.
    #[must_use]
    pub fn has_renames(&self) -> bool {
        self.columns.iter().any(|(k, db)| k != db)
    }

    /// Iterates `(key, db_name)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, db)| (k.as_str(), db.as_str()))
    }
}

/// How the caller intends to consume the result.
///
/// Top-level execution uses it to pick a decoder. When a query is embedded as
/// a select-list sub-query, it selects the wrapping template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnShape {
    /// Every row.
    #[default]
    All,
    /// The first row or nothing.
    One,
    /// The first row; no row is an error.
    OneOrThrow,
    /// Exactly one row; zero or several rows are errors.
    Single,
    /// Rows as positional arrays.
    Rows,
    /// The single selected column of every row.
    Pluck,
    /// The first column of the first row, or nothing.
    Value,
    /// The first column of the first row; no row is an error.
    ValueOrThrow,
    /// Whether any row matches.
    Exists,
    /// Only the affected row count.
    RowCount,
    /// Nothing.
    Void,
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::One => "one",
            Self::OneOrThrow => "oneOrThrow",
            Self::Single => "single",
            Self::Rows => "rows",
            Self::Pluck => "pluck",
            Self::Value => "value",
            Self::ValueOrThrow => "valueOrThrow",
            Self::Exists => "exists",
            Self::RowCount => "rowCount",
            Self::Void => "void",
        };
        f.write_str(name)
    }
}

/// An item of a select or `RETURNING` list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`, or `"alias".*` when joins are present.
    All,
    /// A column, optionally renamed in the output.
    Column {
        /// Column reference.
        column: ColumnRef,
        /// Output name.
        alias: Option<String>,
    },
    /// Any expression (raw fragment, value, aggregate).
    Expr {
        /// Expression.
        expr: Expr,
        /// Output name.
        alias: Option<String>,
    },
    /// A nested query wrapped according to its return shape.
    SubQuery {
        /// The nested query.
        query: Box<Query>,
        /// Output name.
        alias: String,
    },
}

impl SelectItem {
    /// Creates a column item from `"column"` or `"alias.column"`.
    #[must_use]
    pub fn column(path: &str) -> Self {
        Self::Column {
            column: ColumnRef::parse(path),
            alias: None,
        }
    }

    /// Creates a renamed column item.
    #[must_use]
    pub fn column_as(path: &str, alias: &str) -> Self {
        Self::Column {
            column: ColumnRef::parse(path),
            alias: Some(alias.to_string()),
        }
    }

    /// Creates a raw item.
    pub fn raw(sql: impl Into<String>, alias: Option<&str>) -> Self {
        Self::Expr {
            expr: Expr::Raw(RawSql::new(sql)),
            alias: alias.map(str::to_string),
        }
    }

    /// Creates an aggregate item.
    #[must_use]
    pub fn aggregate(aggregate: Aggregate, alias: &str) -> Self {
        Self::Expr {
            expr: Expr::Aggregate(Box::new(aggregate)),
            alias: Some(alias.to_string()),
        }
    }

    /// Creates a sub-query item.
    #[must_use]
    pub fn sub_query(query: Query, alias: &str) -> Self {
        Self::SubQuery {
            query: Box::new(query),
            alias: alias.to_string(),
        }
    }
}

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL JOIN`
    Full,
}

impl JoinKind {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

/// What a join points at.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinTarget {
    /// An explicit table descriptor. Its alias is introduced into scope and
    /// its conditions are added to the `ON` clause.
    Query(Box<Query>),
    /// A bare name: a `WITH` alias of this query, otherwise a relation of the
    /// query's table resolved at compile time.
    Named(String),
}

/// One join.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join kind.
    pub kind: JoinKind,
    /// Join target.
    pub target: JoinTarget,
    /// Explicit condition. For relation joins it is ANDed with the
    /// relation's correlation.
    pub on: Option<Condition>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

/// Placement of NULLs in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    /// `NULLS FIRST`
    First,
    /// `NULLS LAST`
    Last,
}

/// An ordering specification.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Sorted expression.
    pub expr: Expr,
    /// Direction.
    pub direction: OrderDirection,
    /// NULL placement.
    pub nulls: Option<Nulls>,
}

impl OrderBy {
    /// Ascending order on a column.
    #[must_use]
    pub fn asc(column: &str) -> Self {
        Self {
            expr: col(column),
            direction: OrderDirection::Asc,
            nulls: None,
        }
    }

    /// Descending order on a column.
    #[must_use]
    pub fn desc(column: &str) -> Self {
        Self {
            expr: col(column),
            direction: OrderDirection::Desc,
            nulls: None,
        }
    }

    /// Parses `"name"` (ascending) or `"-name"` (descending).
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        if let Some(column) = spec.strip_prefix('-') {
            Self::desc(column)
        } else {
            Self::asc(spec)
        }
    }

    /// Sets NULL placement.
    #[must_use]
    pub const fn nulls(mut self, nulls: Nulls) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// A value slot of an insert row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A bound value.
    Value(SqlValue),
    /// `DEFAULT`
    Default,
    /// A raw fragment.
    Raw(RawSql),
    /// A value shared by several rows, bound once. Indexes
    /// [`InsertRows::shared`].
    Shared(usize),
}

/// Literal rows of an `INSERT ... VALUES`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertRows {
    /// Column keys, in output order.
    pub columns: Vec<String>,
    /// Row values, one per column.
    pub rows: Vec<Vec<InsertValue>>,
    /// Values referenced by [`InsertValue::Shared`].
    pub shared: Vec<SqlValue>,
}

impl InsertRows {
    /// Creates an empty row set with the given columns.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            shared: Vec::new(),
        }
    }

    /// Builds rows from `(column, value)` lists. Columns are the union of
    /// all keys in first-seen order; a missing value becomes `DEFAULT`.
    #[must_use]
    pub fn from_maps(rows: Vec<Vec<(String, SqlValue)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for (key, _) in row {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let mut out = Self::new(columns);
        for row in rows {
            let values = out
                .columns
                .iter()
                .map(|c| {
                    row.iter()
                        .find(|(k, _)| k == c)
                        .map_or(InsertValue::Default, |(_, v)| InsertValue::Value(v.clone()))
                })
                .collect();
            out.rows.push(values);
        }
        out
    }

    /// Registers a shared value and returns its slot.
    pub fn share(&mut self, value: SqlValue) -> usize {
        self.shared.push(value);
        self.shared.len() - 1
    }

    /// Appends a row.
    pub fn push_row(&mut self, row: Vec<InsertValue>) {
        self.rows.push(row);
    }
}

/// Where inserted rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// Literal rows.
    Values(InsertRows),
    /// `INSERT ... SELECT`
    Select {
        /// Target columns, matching the select list positionally.
        columns: Vec<String>,
        /// Source query.
        query: Box<Query>,
    },
}

/// Action taken on a unique conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// `DO NOTHING`
    Ignore,
    /// `DO UPDATE SET col = excluded.col` for each listed column, or for
    /// every inserted column when the list is empty.
    Merge(Vec<String>),
    /// `DO UPDATE SET` with explicit assignments.
    Update(Vec<Assignment>),
}

/// `ON CONFLICT` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Conflict target columns.
    pub target: Vec<String>,
    /// Action.
    pub action: ConflictAction,
}

/// Insert payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertData {
    /// Row source.
    pub source: InsertSource,
    /// Conflict handling.
    pub on_conflict: Option<OnConflict>,
}

impl From<InsertRows> for InsertData {
    fn from(rows: InsertRows) -> Self {
        Self {
            source: InsertSource::Values(rows),
            on_conflict: None,
        }
    }
}

/// Right-hand side of an update assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignValue {
    /// A bound value.
    Value(SqlValue),
    /// A raw fragment.
    Raw(RawSql),
    /// `col = col + value`
    Increment(SqlValue),
    /// `col = col - value`
    Decrement(SqlValue),
    /// Any expression.
    Expr(Expr),
}

/// `column = value` in an `UPDATE ... SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Column key.
    pub column: String,
    /// New value.
    pub value: AssignValue,
}

impl Assignment {
    /// Assigns a value.
    pub fn set(column: &str, value: impl ToSqlValue) -> Self {
        Self {
            column: column.to_string(),
            value: AssignValue::Value(value.to_sql_value()),
        }
    }

    /// Increments by a value.
    pub fn increment(column: &str, by: impl ToSqlValue) -> Self {
        Self {
            column: column.to_string(),
            value: AssignValue::Increment(by.to_sql_value()),
        }
    }

    /// Decrements by a value.
    pub fn decrement(column: &str, by: impl ToSqlValue) -> Self {
        Self {
            column: column.to_string(),
            value: AssignValue::Decrement(by.to_sql_value()),
        }
    }

    /// Assigns a raw fragment.
    pub fn raw(column: &str, sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            column: column.to_string(),
            value: AssignValue::Raw(RawSql::with_params(sql, params)),
        }
    }
}

/// The terminal write intent of a descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Intent {
    /// A plain `SELECT`.
    #[default]
    Select,
    /// `INSERT`
    Insert(InsertData),
    /// `UPDATE`
    Update(Vec<Assignment>),
    /// `DELETE`
    Delete,
}

impl Intent {
    /// Returns a short name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete => "delete",
        }
    }
}

/// A `WITH` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    /// Name the sub-query is known by.
    pub alias: String,
    /// The sub-query.
    pub query: Box<Query>,
}

/// Description of one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub(crate) table: String,
    pub(crate) schema: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) shape: Option<Arc<ColumnShape>>,
    pub(crate) with: Vec<WithItem>,
    pub(crate) distinct: bool,
    pub(crate) select: Vec<SelectItem>,
    pub(crate) conditions: Vec<Condition>,
    pub(crate) joins: Vec<Join>,
    pub(crate) group_by: Vec<Expr>,
    pub(crate) having: Vec<Condition>,
    pub(crate) order: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) intent: Intent,
    pub(crate) returning: Vec<SelectItem>,
    pub(crate) returns: ReturnShape,
}

impl Query {
    /// Creates a descriptor targeting a table.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            ..Self::default()
        }
    }

    /// Sets the schema the table lives in.
    #[must_use]
    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Sets the alias the table is known by.
    #[must_use]
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Attaches the table's column shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Arc<ColumnShape>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Adds a `WITH` entry.
    #[must_use]
    pub fn with(mut self, alias: &str, query: Self) -> Self {
        self.with.push(WithItem {
            alias: alias.to_string(),
            query: Box::new(query),
        });
        self
    }

    /// Selects distinct rows.
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Appends select items.
    #[must_use]
    pub fn select(mut self, items: impl IntoIterator<Item = SelectItem>) -> Self {
        self.select.extend(items);
        self
    }

    /// Appends plain columns to the select list.
    #[must_use]
    pub fn select_columns(self, columns: &[&str]) -> Self {
        self.select(columns.iter().map(|c| SelectItem::column(c)))
    }

    /// Adds a condition, ANDed with the existing ones.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.add_filter(condition);
        self
    }

    /// Replaces the where clause with `(existing) OR c1 OR c2 ...`.
    #[must_use]
    pub fn or(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        let existing = std::mem::take(&mut self.conditions);
        let mut alternatives = Vec::new();
        if !existing.is_empty() {
            alternatives.push(combine(Combinator::And, existing));
        }
        alternatives.extend(conditions);
        self.add_filter(combine(Combinator::Or, alternatives));
        self
    }

    /// Adds a join on an explicit table descriptor.
    #[must_use]
    pub fn join(mut self, kind: JoinKind, target: Self, on: Condition) -> Self {
        self.joins.push(Join {
            kind,
            target: JoinTarget::Query(Box::new(target)),
            on: Some(on),
        });
        self
    }

    /// Adds a join on a `WITH` alias or a relation name.
    #[must_use]
    pub fn join_named(mut self, kind: JoinKind, name: &str, on: Option<Condition>) -> Self {
        self.joins.push(Join {
            kind,
            target: JoinTarget::Named(name.to_string()),
            on,
        });
        self
    }

    /// Appends an ordering.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Appends `GROUP BY` columns.
    #[must_use]
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|c| col(c)));
        self
    }

    /// Adds a `HAVING` condition, ANDed with the existing ones.
    #[must_use]
    pub fn having(mut self, condition: Condition) -> Self {
        self.having.push(condition);
        self
    }

    /// Sets LIMIT.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets OFFSET.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the return shape.
    #[must_use]
    pub const fn returns(mut self, shape: ReturnShape) -> Self {
        self.returns = shape;
        self
    }

    /// Appends `RETURNING` items.
    #[must_use]
    pub fn returning(mut self, items: impl IntoIterator<Item = SelectItem>) -> Self {
        self.returning.extend(items);
        self
    }

    /// Turns the descriptor into an `INSERT`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConflictingIntent`] if a write intent is set.
    pub fn for_insert(mut self, data: impl Into<InsertData>) -> Result<Self> {
        self.set_intent(Intent::Insert(data.into()))?;
        Ok(self)
    }

    /// Turns the descriptor into an `UPDATE`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConflictingIntent`] if a write intent is set.
    pub fn for_update(mut self, assignments: Vec<Assignment>) -> Result<Self> {
        self.set_intent(Intent::Update(assignments))?;
        Ok(self)
    }

    /// Turns the descriptor into a `DELETE`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConflictingIntent`] if a write intent is set.
    pub fn for_delete(mut self) -> Result<Self> {
        self.set_intent(Intent::Delete)?;
        Ok(self)
    }

    /// Adds a condition in place.
    pub fn add_filter(&mut self, condition: Condition) {
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
    }

    /// Adds a select item in place.
    pub fn add_select(&mut self, item: SelectItem) {
        self.select.push(item);
    }

    /// Replaces the select list in place.
    pub fn set_select(&mut self, items: Vec<SelectItem>) {
        self.select = items;
    }

    /// Sets LIMIT in place.
    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    /// Drops every ordering in place.
    pub fn clear_order(&mut self) {
        self.order.clear();
    }

    /// Sets the return shape in place.
    pub fn set_returns(&mut self, shape: ReturnShape) {
        self.returns = shape;
    }

    /// Sets the write intent in place.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ConflictingIntent`] if a write intent is set.
    pub fn set_intent(&mut self, intent: Intent) -> Result<()> {
        if !matches!(self.intent, Intent::Select) {
            return Err(QueryError::ConflictingIntent {
                table: self.table.clone(),
                existing: self.intent.name(),
                attempted: intent.name(),
            });
        }
        self.intent = intent;
        Ok(())
    }

    /// Clears ordering, paging and the select list, keeping the table,
    /// alias, joins and conditions.
    #[must_use]
    pub fn scope_only(mut self) -> Self {
        self.select.clear();
        self.order.clear();
        self.limit = None;
        self.offset = None;
        self.distinct = false;
        self.returns = ReturnShape::All;
        self
    }

    /// Table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The alias the table is referenced by: the explicit alias or the table
    /// name.
    #[must_use]
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Column shape, if attached.
    #[must_use]
    pub fn shape(&self) -> Option<&Arc<ColumnShape>> {
        self.shape.as_ref()
    }

    /// Current where conditions (ANDed).
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Current select list.
    #[must_use]
    pub fn select_items(&self) -> &[SelectItem] {
        &self.select
    }

    /// Current write intent.
    #[must_use]
    pub const fn intent(&self) -> &Intent {
        &self.intent
    }

    /// Current return shape.
    #[must_use]
    pub const fn return_shape(&self) -> ReturnShape {
        self.returns
    }

    /// Current LIMIT.
    #[must_use]
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Current OFFSET.
    #[must_use]
    pub const fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Whether a LIMIT or OFFSET is set.
    #[must_use]
    pub const fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Whether the rows are reduced by `DISTINCT` or `GROUP BY`.
    #[must_use]
    pub fn is_collapsed(&self) -> bool {
        self.distinct || !self.group_by.is_empty()
    }

    /// Returns true if the query has joins.
    #[must_use]
    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Compiles the descriptor. Named joins cannot be resolved without a
    /// relation resolver; see [`compiler::compile_with`].
    ///
    /// # Errors
    ///
    /// Returns the compiler's build-time errors.
    pub fn compile(&self) -> Result<Sql> {
        compiler::compile(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_is_clone_on_write() {
        let base = Query::table("user").filter(Condition::eq("active", true));
        let narrowed = base.clone().filter(Condition::eq("name", "x"));
        assert_eq!(base.conditions().len(), 1);
        assert_eq!(narrowed.conditions().len(), 2);
    }

    #[test]
    fn test_second_write_intent_conflicts() {
        let query = Query::table("user").for_delete().unwrap();
        let err = query
            .for_update(vec![Assignment::set("name", "x")])
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::ConflictingIntent {
                table: "user".into(),
                existing: "delete",
                attempted: "update",
            }
        );
    }

    #[test]
    fn test_or_wraps_existing_conditions() {
        let query = Query::table("user")
            .filter(Condition::eq("a", 1))
            .or([Condition::eq("b", 2)]);
        assert_eq!(
            query.conditions(),
            &[Condition::Or(vec![
                Condition::eq("a", 1),
                Condition::eq("b", 2)
            ])]
        );
    }

    #[test]
    fn test_insert_rows_from_maps_fills_defaults() {
        let rows = InsertRows::from_maps(vec![
            vec![("name".into(), SqlValue::Text("a".into()))],
            vec![("age".into(), SqlValue::Int(3))],
        ]);
        assert_eq!(rows.columns, vec!["name".to_string(), "age".to_string()]);
        assert_eq!(rows.rows[0][1], InsertValue::Default);
        assert_eq!(rows.rows[1][0], InsertValue::Default);
    }

    #[test]
    fn test_order_by_parse() {
        assert_eq!(OrderBy::parse("-createdAt").direction, OrderDirection::Desc);
        assert_eq!(OrderBy::parse("name").direction, OrderDirection::Asc);
    }
}
