//! Nested writes: one create or update call that also writes related rows.
//!
//! The payload types describe what to do per relation. [`create`] and
//! [`update`] expand them into statements in dependency order: rows holding
//! a key the current table needs are written first, the current table next,
//! rows that need the current table's keys last. Every expansion with nested
//! data runs in a transaction, so it either applies completely or not at all.
//!
//! Each nested operation is issued once per batch, never once per record.

pub(crate) mod create;
pub(crate) mod update;

use std::collections::BTreeMap;
use std::sync::Arc;

use relq_core::{
    compile_with, Assignment, AssignValue, Condition, InsertRows, InsertValue, Query, SelectItem,
    SqlValue, ToSqlValue,
};

use crate::adapter::QueryResult;
use crate::db::Db;
use crate::error::{OrmError, Result};
use crate::record::Record;
use crate::relations::{Relation, RelationKind};
use crate::schema::{AfterWriteHook, TableDef};
use crate::table_query::DecodePlan;

/// Values of one record to create, plus nested writes on its relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateData {
    pub(crate) values: Record,
    pub(crate) relations: BTreeMap<String, NestedCreate>,
}

impl CreateData {
    /// Creates an empty payload; every column takes its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl ToSqlValue) -> Self {
        self.values.set(key, value);
        self
    }

    /// Adds nested writes for a relation.
    #[must_use]
    pub fn with_relation(mut self, name: &str, nested: NestedCreate) -> Self {
        self.relations.insert(name.to_string(), nested);
        self
    }

    /// Column values.
    #[must_use]
    pub const fn values(&self) -> &Record {
        &self.values
    }
}

impl From<Record> for CreateData {
    fn from(values: Record) -> Self {
        Self {
            values,
            relations: BTreeMap::new(),
        }
    }
}

/// A `connectOrCreate` entry: connect the row matching `condition`, or
/// create one from `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOrCreate {
    /// Lookup condition.
    pub condition: Condition,
    /// Record created when nothing matches.
    pub create: CreateData,
}

/// Nested writes on one relation of a record being created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedCreate {
    pub(crate) create: Vec<CreateData>,
    pub(crate) connect: Vec<Condition>,
    pub(crate) connect_or_create: Vec<ConnectOrCreate>,
}

impl NestedCreate {
    /// No nested writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a related record.
    #[must_use]
    pub fn create(mut self, data: CreateData) -> Self {
        self.create.push(data);
        self
    }

    /// Creates several related records.
    #[must_use]
    pub fn create_many(mut self, data: impl IntoIterator<Item = CreateData>) -> Self {
        self.create.extend(data);
        self
    }

    /// Links existing rows matching `condition`.
    #[must_use]
    pub fn connect(mut self, condition: Condition) -> Self {
        self.connect.push(condition);
        self
    }

    /// Links the row matching `condition`, creating it from `create` when
    /// nothing matches.
    #[must_use]
    pub fn connect_or_create(mut self, condition: Condition, create: CreateData) -> Self {
        self.connect_or_create
            .push(ConnectOrCreate { condition, create });
        self
    }

    fn len(&self) -> usize {
        self.create.len() + self.connect.len() + self.connect_or_create.len()
    }
}

/// Assignments of an update, plus nested writes on relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateData {
    pub(crate) assignments: Vec<Assignment>,
    pub(crate) relations: BTreeMap<String, NestedUpdate>,
}

impl UpdateData {
    /// No assignments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`
    #[must_use]
    pub fn set(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.assignments.push(Assignment::set(column, value));
        self
    }

    /// `column = column + by`
    #[must_use]
    pub fn increment(mut self, column: &str, by: impl ToSqlValue) -> Self {
        self.assignments.push(Assignment::increment(column, by));
        self
    }

    /// `column = column - by`
    #[must_use]
    pub fn decrement(mut self, column: &str, by: impl ToSqlValue) -> Self {
        self.assignments.push(Assignment::decrement(column, by));
        self
    }

    /// Any assignment.
    #[must_use]
    pub fn assign(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    /// Adds nested writes for a relation.
    #[must_use]
    pub fn with_relation(mut self, name: &str, nested: impl Into<NestedUpdate>) -> Self {
        self.relations.insert(name.to_string(), nested.into());
        self
    }
}

/// Update the related record, or create it when there is none.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    /// Applied to the existing related record.
    pub update: UpdateData,
    /// Created when there is no related record.
    pub create: CreateData,
}

/// Nested writes on a `belongsTo` or `hasOne` relation of updated records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToOneUpdate {
    pub(crate) connect: Option<Condition>,
    pub(crate) create: Option<CreateData>,
    pub(crate) disconnect: bool,
    pub(crate) delete: bool,
    pub(crate) update: Option<UpdateData>,
    pub(crate) upsert: Option<Upsert>,
}

impl ToOneUpdate {
    /// No nested writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links the row matching `condition` instead of the current one.
    #[must_use]
    pub fn connect(mut self, condition: Condition) -> Self {
        self.connect = Some(condition);
        self
    }

    /// Creates a row and links it instead of the current one.
    #[must_use]
    pub fn create(mut self, data: CreateData) -> Self {
        self.create = Some(data);
        self
    }

    /// Unlinks the current row.
    #[must_use]
    pub const fn disconnect(mut self) -> Self {
        self.disconnect = true;
        self
    }

    /// Deletes the current row.
    #[must_use]
    pub const fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Updates the current row.
    #[must_use]
    pub fn update(mut self, data: UpdateData) -> Self {
        self.update = Some(data);
        self
    }

    /// Updates the current row, or creates and links one.
    #[must_use]
    pub fn upsert(mut self, update: UpdateData, create: CreateData) -> Self {
        self.upsert = Some(Upsert { update, create });
        self
    }
}

/// Nested writes on a `hasMany` or `hasAndBelongsToMany` relation of updated
/// records. Condition lists are ORed; an empty list does nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToManyUpdate {
    pub(crate) create: Vec<CreateData>,
    pub(crate) connect: Vec<Condition>,
    pub(crate) disconnect: Vec<Condition>,
    pub(crate) delete: Vec<Condition>,
    pub(crate) update: Option<(Vec<Condition>, UpdateData)>,
    pub(crate) set: Option<Vec<Condition>>,
}

impl ToManyUpdate {
    /// No nested writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates related records.
    #[must_use]
    pub fn create(mut self, data: impl IntoIterator<Item = CreateData>) -> Self {
        self.create.extend(data);
        self
    }

    /// Links existing rows.
    #[must_use]
    pub fn connect(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.connect.extend(conditions);
        self
    }

    /// Unlinks related rows.
    #[must_use]
    pub fn disconnect(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.disconnect.extend(conditions);
        self
    }

    /// Deletes related rows.
    #[must_use]
    pub fn delete(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.delete.extend(conditions);
        self
    }

    /// Updates related rows.
    #[must_use]
    pub fn update(mut self, conditions: impl IntoIterator<Item = Condition>, data: UpdateData) -> Self {
        self.update = Some((conditions.into_iter().collect(), data));
        self
    }

    /// Replaces the related set with the rows matching `conditions`.
    #[must_use]
    pub fn set(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.set = Some(conditions.into_iter().collect());
        self
    }
}

/// Nested writes on one relation of updated records.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedUpdate {
    /// For `belongsTo` and `hasOne`.
    ToOne(ToOneUpdate),
    /// For `hasMany` and `hasAndBelongsToMany`.
    ToMany(ToManyUpdate),
}

impl From<ToOneUpdate> for NestedUpdate {
    fn from(update: ToOneUpdate) -> Self {
        Self::ToOne(update)
    }
}

impl From<ToManyUpdate> for NestedUpdate {
    fn from(update: ToManyUpdate) -> Self {
        Self::ToMany(update)
    }
}

/// Key columns of a relation whose foreign key lives on the related table.
pub(crate) struct OwnedKeys<'a> {
    pub(crate) primary_keys: &'a [String],
    pub(crate) foreign_keys: &'a [String],
}

/// Key columns of a many-to-many relation.
pub(crate) struct JoinKeys<'a> {
    pub(crate) primary_keys: &'a [String],
    pub(crate) join_table: &'a str,
    pub(crate) foreign_keys: &'a [String],
    pub(crate) association_foreign_keys: &'a [String],
    pub(crate) association_primary_keys: &'a [String],
}

pub(crate) fn owned_keys(relation: &Relation) -> Option<OwnedKeys<'_>> {
    match &relation.kind {
        RelationKind::HasOne {
            primary_keys,
            foreign_keys,
        }
        | RelationKind::HasMany {
            primary_keys,
            foreign_keys,
        } => Some(OwnedKeys {
            primary_keys,
            foreign_keys,
        }),
        _ => None,
    }
}

pub(crate) fn join_keys(relation: &Relation) -> Option<JoinKeys<'_>> {
    match &relation.kind {
        RelationKind::HasAndBelongsToMany {
            primary_keys,
            join_table,
            foreign_keys,
            association_foreign_keys,
            association_primary_keys,
        } => Some(JoinKeys {
            primary_keys,
            join_table,
            foreign_keys,
            association_foreign_keys,
            association_primary_keys,
        }),
        _ => None,
    }
}

pub(crate) fn invalid(table: &str, relation: &str, reason: impl Into<String>) -> OrmError {
    OrmError::InvalidNestedWrite {
        table: table.to_string(),
        relation: relation.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn not_found(table: &str) -> OrmError {
    OrmError::NotFound {
        table: table.to_string(),
    }
}

pub(crate) async fn execute(db: &Db, query: &Query) -> Result<QueryResult> {
    let sql = compile_with(query, db.schema().as_ref())?;
    db.query(&sql).await
}

/// Runs `query` and decodes its rows as rows of `table`.
pub(crate) async fn fetch(db: &Db, table: &Arc<TableDef>, query: &Query) -> Result<Vec<Record>> {
    let result = execute(db, query).await?;
    DecodePlan::new(Arc::clone(table)).decode_rows(result.rows)
}

/// The values of `columns` in `record`.
pub(crate) fn key_tuple(record: &Record, table: &str, columns: &[String]) -> Result<Vec<SqlValue>> {
    columns
        .iter()
        .map(|c| {
            record.get(c).cloned().ok_or_else(|| OrmError::MissingKey {
                table: table.to_string(),
                column: c.clone(),
            })
        })
        .collect()
}

pub(crate) fn key_tuples(records: &[Record], table: &str, columns: &[String]) -> Result<Vec<Vec<SqlValue>>> {
    records
        .iter()
        .map(|r| key_tuple(r, table, columns))
        .collect()
}

/// `(columns) IN (tuples)`
pub(crate) fn in_keys(columns: &[String], tuples: Vec<Vec<SqlValue>>) -> Condition {
    Condition::in_tuples(&column_refs(columns), tuples)
}

/// Sets `columns` of `record` to `values`.
pub(crate) fn assign_keys(record: &mut Record, columns: &[String], values: &[SqlValue]) {
    for (column, value) in columns.iter().zip(values) {
        record.set(column, value.clone());
    }
}

/// `column = value` for every pair.
pub(crate) fn key_assignments(columns: &[String], values: &[SqlValue]) -> Vec<Assignment> {
    columns
        .iter()
        .zip(values)
        .map(|(c, v)| Assignment::set(c, v.clone()))
        .collect()
}

pub(crate) fn null_assignments(columns: &[String]) -> Vec<Assignment> {
    columns
        .iter()
        .map(|c| Assignment::set(c, SqlValue::Null))
        .collect()
}

/// Fails unless every column in `columns` accepts NULL.
pub(crate) fn require_nullable(
    owner: &str,
    relation: &str,
    table: &TableDef,
    columns: &[String],
    operation: &str,
) -> Result<()> {
    match columns
        .iter()
        .find(|c| !table.find_column(c).is_some_and(|def| def.is_nullable()))
    {
        Some(column) => Err(invalid(
            owner,
            relation,
            format!("{operation} needs `{}.{column}` to be nullable", table.name()),
        )),
        None => Ok(()),
    }
}

/// Runs plain value assignments through the column encoders.
pub(crate) fn encode_assignments(table: &TableDef, assignments: Vec<Assignment>) -> Result<Vec<Assignment>> {
    assignments
        .into_iter()
        .map(|assignment| {
            let value = match assignment.value {
                AssignValue::Value(v) => AssignValue::Value(table.encode(&assignment.column, v)?),
                AssignValue::Increment(v) => {
                    AssignValue::Increment(table.encode(&assignment.column, v)?)
                }
                AssignValue::Decrement(v) => {
                    AssignValue::Decrement(table.encode(&assignment.column, v)?)
                }
                other => other,
            };
            Ok(Assignment {
                column: assignment.column,
                value,
            })
        })
        .collect()
}

/// Builds insert rows; columns in `shared` come first and equal values in
/// them reuse one placeholder.
pub(crate) fn insert_rows(table: &TableDef, records: &[Record], shared: &[String]) -> Result<InsertRows> {
    let mut columns: Vec<String> = shared
        .iter()
        .filter(|c| records.iter().any(|r| r.get(c).is_some()))
        .cloned()
        .collect();
    for record in records {
        for key in record.values().keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut rows = InsertRows::new(columns.clone());
    let mut interned: Vec<(String, SqlValue, usize)> = Vec::new();
    for record in records {
        let mut row = Vec::with_capacity(columns.len());
        for column in &columns {
            let Some(value) = record.get(column) else {
                row.push(InsertValue::Default);
                continue;
            };
            let value = table.encode(column, value.clone())?;
            if shared.contains(column) {
                let slot = if let Some((_, _, slot)) =
                    interned.iter().find(|(c, v, _)| c == column && *v == value)
                {
                    *slot
                } else {
                    let slot = rows.share(value.clone());
                    interned.push((column.clone(), value, slot));
                    slot
                };
                row.push(InsertValue::Shared(slot));
            } else {
                row.push(InsertValue::Value(value));
            }
        }
        rows.push_row(row);
    }
    Ok(rows)
}

/// Inserts `(parent key, related key)` pairs into a join table in one
/// statement.
pub(crate) async fn insert_join_rows(
    db: &Db,
    keys: &JoinKeys<'_>,
    pairs: Vec<(Vec<SqlValue>, Vec<SqlValue>)>,
) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let records: Vec<Record> = pairs
        .into_iter()
        .map(|(parent, related)| {
            let mut record = Record::new();
            assign_keys(&mut record, keys.foreign_keys, &parent);
            assign_keys(&mut record, keys.association_foreign_keys, &related);
            record
        })
        .collect();
    let join_table = db
        .schema()
        .table(keys.join_table)
        .map_or_else(|_| Arc::new(TableDef::new(keys.join_table)), Arc::clone);
    let rows = insert_rows(&join_table, &records, keys.foreign_keys)?;
    let query = db.schema().query_on(keys.join_table).for_insert(rows)?;
    execute(db, &query).await?;
    Ok(())
}

pub(crate) fn column_refs(columns: &[String]) -> Vec<&str> {
    columns.iter().map(String::as_str).collect()
}

/// Applies `assignments` to the rows of `table` matching `condition`.
pub(crate) async fn assign_where(
    db: &Db,
    table: &TableDef,
    condition: Condition,
    assignments: Vec<Assignment>,
) -> Result<u64> {
    let query = table
        .query()
        .filter(condition)
        .for_update(encode_assignments(table, assignments)?)?;
    Ok(execute(db, &query).await?.row_count)
}

/// Deletes the rows matched by `query`, handing them to `after_delete`
/// hooks when there are any.
pub(crate) async fn delete_rows(db: &Db, table: &Arc<TableDef>, query: Query) -> Result<u64> {
    let hooks = &table.hooks().after_delete;
    let delete = query.for_delete()?;
    if hooks.is_empty() {
        return Ok(execute(db, &delete).await?.row_count);
    }
    let rows = fetch(db, table, &delete.returning([SelectItem::All])).await?;
    run_after_hooks(table, "after_delete", hooks, &rows)?;
    Ok(rows.len() as u64)
}

pub(crate) fn run_after_hooks(
    table: &TableDef,
    hook: &'static str,
    hooks: &[AfterWriteHook],
    records: &[Record],
) -> Result<()> {
    for f in hooks {
        f(records).map_err(|source| OrmError::Hook {
            table: table.name().to_string(),
            hook,
            source,
        })?;
    }
    Ok(())
}
