//! Fluent queries on one table.
//!
//! A [`TableQuery`] is a [`Query`] bound to a [`Db`] and a [`TableDef`].
//! Builder methods return a new value and never touch the database; the
//! terminal methods (`all`, `take`, `find`, `count`, `create`, `update`, ...)
//! compile the descriptor, run it and decode the returned rows.
//!
//! # Example
//!
//! ```ignore
//! use relq_core::Condition;
//!
//! let users = db
//!     .table("user")?
//!     .filter(Condition::eq("active", true))
//!     .select_relation("messages", "messages", |q| q.order("-createdAt").limit(5))?
//!     .order("name")
//!     .all()
//!     .await?;
//! ```

mod decode;
mod write;

use std::fmt;
use std::sync::Arc;

use relq_core::{
    compile_with, Aggregate, ColumnRef, Condition, JoinKind, OnConflict, OrderBy, Query,
    ReturnShape, SelectItem, Sql, SqlValue, ToSqlValue,
};

pub(crate) use decode::DecodePlan;

use crate::db::Db;
use crate::error::{OrmError, Result};
use crate::nested::create::Parent;
use crate::nested::{execute, not_found};
use crate::record::Record;
use crate::relations::{join_condition, method_condition, Relation};
use crate::schema::TableDef;

/// The parent a relation query was reached from; creates go through it.
#[derive(Debug)]
struct Chain {
    relation: Arc<Relation>,
    parent_table: Arc<TableDef>,
    parent: Parent,
}

/// A query on one table, bound to a database.
#[derive(Clone)]
pub struct TableQuery {
    db: Db,
    table: Arc<TableDef>,
    query: Query,
    all_rows: bool,
    on_conflict: Option<OnConflict>,
    chain: Option<Arc<Chain>>,
    plan: DecodePlan,
}

impl fmt::Debug for TableQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableQuery")
            .field("table", &self.table.name())
            .field("query", &self.query)
            .field("all_rows", &self.all_rows)
            .finish_non_exhaustive()
    }
}

/// `alias`, or `alias` with a numeric suffix when it is already taken.
fn free_alias(alias: &str, taken: &str) -> String {
    if alias == taken {
        format!("{alias}2")
    } else {
        alias.to_string()
    }
}

impl TableQuery {
    pub(crate) fn new(db: Db, table: Arc<TableDef>) -> Self {
        Self {
            query: table.query(),
            plan: DecodePlan::new(Arc::clone(&table)),
            db,
            table,
            all_rows: false,
            on_conflict: None,
            chain: None,
        }
    }

    /// The table queried.
    #[must_use]
    pub fn table_def(&self) -> &Arc<TableDef> {
        &self.table
    }

    /// The underlying descriptor.
    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Adds a condition, ANDed with the existing ones.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.query = self.query.filter(condition);
        self
    }

    /// Excludes rows matching `condition`.
    #[must_use]
    pub fn exclude(mut self, condition: Condition) -> Self {
        self.query = self.query.filter(condition.negate());
        self
    }

    /// `(existing conditions) OR c1 OR c2 ...`
    #[must_use]
    pub fn or(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.query = self.query.or(conditions);
        self
    }

    /// Selects columns by key.
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.query = self.query.select_columns(columns);
        self
    }

    /// Orders by `"column"` or, descending, `"-column"`.
    #[must_use]
    pub fn order(self, spec: &str) -> Self {
        self.order_by(OrderBy::parse(spec))
    }

    /// Appends an ordering.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.query = self.query.order_by(order);
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    /// Skips rows.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    /// Returns distinct rows.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.query = self.query.distinct();
        self
    }

    /// Allows `update` and `delete` without conditions.
    #[must_use]
    pub const fn all_rows(mut self) -> Self {
        self.all_rows = true;
        self
    }

    /// Adds `ON CONFLICT` handling to creates.
    #[must_use]
    pub fn on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.on_conflict = Some(on_conflict);
        self
    }

    /// Inner-joins a relation; its columns are addressed by the relation name.
    #[must_use]
    pub fn join_relation(mut self, name: &str) -> Self {
        self.query = self.query.join_named(JoinKind::Inner, name, None);
        self
    }

    /// Loads a relation into every returned record under `alias`.
    ///
    /// `customize` receives a query on the related table, already correlated
    /// with this one, and may filter, order, limit or select further
    /// relations. Turning it into [`TableQuery::into_count`],
    /// [`TableQuery::into_pluck`] or [`TableQuery::into_exists`] loads a
    /// value instead of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown.
    pub fn select_relation(
        mut self,
        name: &str,
        alias: &str,
        customize: impl FnOnce(Self) -> Self,
    ) -> Result<Self> {
        let schema = Arc::clone(self.db.schema());
        let relation = Arc::clone(schema.require_relation(self.table.name(), name)?);
        let related = Arc::clone(schema.table(&relation.related)?);
        let parent_alias = self.query.alias().to_string();
        let child_alias = free_alias(&relation.name, &parent_alias);

        let mut child = Self::new(self.db.clone(), related);
        child.query = child
            .query
            .with_alias(&child_alias)
            .filter(join_condition(&schema, &relation, &parent_alias, &child_alias));
        let mut child = customize(child);
        if child.query.return_shape() == ReturnShape::All && relation.returns_one() {
            child.query.set_returns(ReturnShape::One);
        }
        let shape = child.query.return_shape();
        let column = match child.query.select_items() {
            [SelectItem::Column { column, .. }] if shape == ReturnShape::Pluck => {
                Some(column.name.clone())
            }
            _ => None,
        };

        if self.query.select_items().is_empty() {
            self.query.add_select(SelectItem::All);
        }
        self.query.add_select(SelectItem::sub_query(child.query, alias));
        self.plan.add_relation(alias, shape, column, child.plan);
        Ok(self)
    }

    /// Turns the query into `count(*)`; used inside
    /// [`TableQuery::select_relation`].
    #[must_use]
    pub fn into_count(mut self) -> Self {
        self.query.clear_order();
        self.query
            .set_select(vec![SelectItem::aggregate(Aggregate::count_all(), "count")]);
        self.query.set_returns(ReturnShape::Value);
        self
    }

    /// Turns the query into a list of one column's values.
    #[must_use]
    pub fn into_pluck(mut self, column: &str) -> Self {
        self.query.set_select(vec![SelectItem::column(column)]);
        self.query.set_returns(ReturnShape::Pluck);
        self
    }

    /// Turns the query into an existence check.
    #[must_use]
    pub fn into_exists(mut self) -> Self {
        self.query.clear_order();
        self.query.set_returns(ReturnShape::Exists);
        self
    }

    /// Query on the rows related to any row this query matches.
    ///
    /// Records created on the returned query are linked to the first
    /// matching parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown.
    pub fn relation(&self, name: &str) -> Result<Self> {
        let schema = Arc::clone(self.db.schema());
        let relation = Arc::clone(schema.require_relation(self.table.name(), name)?);
        let related = Arc::clone(schema.table(&relation.related)?);
        let parent_alias = self.query.alias().to_string();

        let mut child = Self::new(self.db.clone(), related);
        let child_alias = free_alias(child.query.alias(), &parent_alias);
        if child_alias != child.query.alias() {
            child.query = child.query.with_alias(&child_alias);
        }
        let parent = self
            .query
            .clone()
            .scope_only()
            .filter(join_condition(&schema, &relation, &parent_alias, &child_alias))
            .limit(1);
        child.query = child.query.filter(Condition::exists(parent));
        child.chain = Some(Arc::new(Chain {
            relation,
            parent_table: Arc::clone(&self.table),
            parent: Parent::Query(self.query.clone().scope_only()),
        }));
        Ok(child)
    }

    /// Query on the rows related to `record`, a record of this table.
    ///
    /// # Errors
    ///
    /// Returns an error if the relation is unknown or `record` lacks a key
    /// the relation needs.
    pub fn related(&self, name: &str, record: &Record) -> Result<Self> {
        let schema = Arc::clone(self.db.schema());
        let relation = Arc::clone(schema.require_relation(self.table.name(), name)?);
        let related = Arc::clone(schema.table(&relation.related)?);

        let mut child = Self::new(self.db.clone(), related);
        let alias = child.query.alias().to_string();
        child.query = child
            .query
            .filter(method_condition(&schema, &relation, record, &alias)?);
        child.chain = Some(Arc::new(Chain {
            relation,
            parent_table: Arc::clone(&self.table),
            parent: Parent::Record(record.clone()),
        }));
        Ok(child)
    }

    /// Compiles the query without running it.
    ///
    /// # Errors
    ///
    /// Returns the compiler's build-time errors.
    pub fn to_sql(&self) -> Result<Sql> {
        Ok(compile_with(&self.query, self.db.schema().as_ref())?)
    }

    /// Every matching record.
    ///
    /// # Errors
    ///
    /// Returns a build, database or codec error.
    pub async fn all(&self) -> Result<Vec<Record>> {
        let result = execute(&self.db, &self.query).await?;
        self.plan.decode_rows(result.rows)
    }

    /// The first matching record.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] if nothing matches.
    pub async fn take(&self) -> Result<Record> {
        self.take_optional()
            .await?
            .ok_or_else(|| not_found(self.table.name()))
    }

    /// The first matching record, if any.
    ///
    /// # Errors
    ///
    /// Returns a build, database or codec error.
    pub async fn take_optional(&self) -> Result<Option<Record>> {
        let query = self.query.clone().limit(1);
        let mut rows = execute(&self.db, &query).await?.rows;
        match rows.pop() {
            Some(row) => self.plan.decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// The record with primary key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::InvalidKey`] if the table has no single-column
    /// primary key and [`OrmError::NotFound`] if nothing matches.
    pub async fn find(&self, key: impl ToSqlValue) -> Result<Record> {
        let primary_key = self.table.primary_key();
        let [column] = primary_key.as_slice() else {
            return Err(OrmError::InvalidKey {
                table: self.table.name().to_string(),
                reason: format!(
                    "expected a single primary key column, found {}",
                    primary_key.len()
                ),
            });
        };
        self.clone()
            .filter(Condition::eq(column, key))
            .take()
            .await
    }

    /// The only record matching `condition`.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] or [`OrmError::MoreThanOneRow`].
    pub async fn find_by(&self, condition: Condition) -> Result<Record> {
        self.find_by_optional(condition)
            .await?
            .ok_or_else(|| not_found(self.table.name()))
    }

    /// The only record matching `condition`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::MoreThanOneRow`] if several records match.
    pub async fn find_by_optional(&self, condition: Condition) -> Result<Option<Record>> {
        let query = self.query.clone().filter(condition).limit(2);
        let mut rows = execute(&self.db, &query).await?.rows;
        match rows.len() {
            0 => Ok(None),
            1 => rows
                .pop()
                .map(|row| self.plan.decode_row(row))
                .transpose(),
            count => Err(OrmError::MoreThanOneRow {
                table: self.table.name().to_string(),
                count,
            }),
        }
    }

    /// One column of every matching row.
    ///
    /// # Errors
    ///
    /// Returns a build, database or codec error.
    pub async fn pluck(&self, column: &str) -> Result<Vec<SqlValue>> {
        let key = ColumnRef::parse(column).name;
        let mut query = self.query.clone();
        query.set_select(vec![SelectItem::column(column)]);
        execute(&self.db, &query)
            .await?
            .rows
            .into_iter()
            .map(|mut row| {
                let value = row.remove(&key).unwrap_or(SqlValue::Null);
                self.table.decode(&key, value)
            })
            .collect()
    }

    /// One column of the first matching row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::NotFound`] if nothing matches.
    pub async fn get(&self, column: &str) -> Result<SqlValue> {
        self.get_optional(column)
            .await?
            .ok_or_else(|| not_found(self.table.name()))
    }

    /// One column of the first matching row, if any.
    ///
    /// # Errors
    ///
    /// Returns a build, database or codec error.
    pub async fn get_optional(&self, column: &str) -> Result<Option<SqlValue>> {
        Ok(self.clone().limit(1).pluck(column).await?.pop())
    }

    /// Number of matching rows.
    ///
    /// # Errors
    ///
    /// Returns a build or database error.
    pub async fn count(&self) -> Result<i64> {
        let count = SelectItem::aggregate(Aggregate::count_all(), "count");
        let query = if self.query.is_collapsed() || self.query.is_paged() {
            let mut rows = self.query.clone();
            rows.set_returns(ReturnShape::All);
            Query::table("t").with("t", rows).select([count])
        } else {
            self.query.clone().scope_only().select([count])
        };
        let rows = execute(&self.db, &query).await?.rows;
        Ok(rows.first().and_then(|row| row.get_i64("count")).unwrap_or(0))
    }

    /// Whether any row matches.
    ///
    /// # Errors
    ///
    /// Returns a build or database error.
    pub async fn exists(&self) -> Result<bool> {
        let one = SelectItem::raw("1", Some("exists"));
        let query = if self.query.is_paged() {
            let mut rows = self.query.clone();
            rows.set_returns(ReturnShape::All);
            Query::table("t").with("t", rows).select([one]).limit(1)
        } else {
            self.query.clone().scope_only().select([one]).limit(1)
        };
        Ok(!execute(&self.db, &query).await?.rows.is_empty())
    }

    fn is_scoped(&self) -> bool {
        self.all_rows || !self.query.conditions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_alias_suffixes_collisions() {
        assert_eq!(free_alias("user", "user"), "user2");
        assert_eq!(free_alias("author", "message"), "author");
    }
}
