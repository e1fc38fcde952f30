//! Nested update.
//!
//! `belongsTo` writes run before the main `UPDATE`, as they may change the
//! foreign keys it sets. The main statement returns the updated rows; their
//! keys drive the writes on `hasOne`, `hasMany` and `hasAndBelongsToMany`
//! relations afterwards.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use relq_core::{Assignment, Condition, Query, SelectItem, SqlValue};

use super::create::{create_records, InsertOptions};
use super::{
    assign_keys, assign_where, column_refs, delete_rows, encode_assignments, execute, fetch,
    in_keys, insert_join_rows, invalid, join_keys, key_assignments, key_tuple, key_tuples,
    not_found, null_assignments, owned_keys, require_nullable, run_after_hooks, CreateData,
    NestedUpdate, ToManyUpdate, ToOneUpdate, UpdateData,
};
use crate::db::Db;
use crate::error::Result;
use crate::record::Record;
use crate::relations::{join_table_alias, Relation, RelationKind};
use crate::schema::{Schema, TableDef};

/// What an update did.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateOutcome {
    pub(crate) count: u64,
    /// Updated rows, when they were asked for.
    pub(crate) rows: Vec<Record>,
}

/// Updates the rows of `table` matched by `query` and applies nested writes.
pub(crate) fn update_rows<'a>(
    db: &'a Db,
    table: Arc<TableDef>,
    query: Query,
    data: UpdateData,
    returning: bool,
) -> BoxFuture<'a, Result<UpdateOutcome>> {
    async move {
        validate(db.schema(), &table, &data)?;
        if data.relations.is_empty() {
            return update_plain(db, &table, query, data.assignments, returning).await;
        }
        db.transaction(|| update_nested(db, &table, query, data, returning))
            .await
    }
    .boxed()
}

fn validate(schema: &Schema, table: &TableDef, data: &UpdateData) -> Result<()> {
    for (name, nested) in &data.relations {
        let relation = schema.require_relation(table.name(), name)?;
        let related = schema.table(&relation.related)?;
        match (&relation.kind, nested) {
            (RelationKind::Through { .. }, _) => {
                return Err(invalid(table.name(), name, "through relations are read-only"));
            }
            (
                RelationKind::HasMany { .. } | RelationKind::HasAndBelongsToMany { .. },
                NestedUpdate::ToOne(_),
            ) => {
                return Err(invalid(table.name(), name, "a to-many relation takes a to-many update"));
            }
            (RelationKind::BelongsTo { .. } | RelationKind::HasOne { .. }, NestedUpdate::ToMany(_)) => {
                return Err(invalid(table.name(), name, "a to-one relation takes a to-one update"));
            }
            (RelationKind::BelongsTo { foreign_keys, .. }, NestedUpdate::ToOne(update))
                if update.disconnect || update.delete =>
            {
                require_nullable(table.name(), name, table, foreign_keys, "disconnect")?;
            }
            (RelationKind::HasOne { foreign_keys, .. }, NestedUpdate::ToOne(update))
                if update.disconnect || update.connect.is_some() || update.create.is_some() =>
            {
                require_nullable(table.name(), name, related, foreign_keys, "replacing the related record")?;
            }
            (RelationKind::HasMany { foreign_keys, .. }, NestedUpdate::ToMany(update))
                if !update.disconnect.is_empty()
                    || update.set.as_ref().is_some_and(|set| !set.is_empty()) =>
            {
                require_nullable(table.name(), name, related, foreign_keys, "disconnect")?;
            }
            _ => {}
        }
        match nested {
            NestedUpdate::ToOne(update) => {
                if let Some(data) = &update.update {
                    validate(schema, related, data)?;
                }
                if let Some(upsert) = &update.upsert {
                    validate(schema, related, &upsert.update)?;
                }
            }
            NestedUpdate::ToMany(update) => {
                if let Some((_, data)) = &update.update {
                    validate(schema, related, data)?;
                }
            }
        }
    }
    Ok(())
}

async fn update_plain(
    db: &Db,
    table: &Arc<TableDef>,
    query: Query,
    assignments: Vec<Assignment>,
    returning: bool,
) -> Result<UpdateOutcome> {
    let hooks = &table.hooks().after_update;
    let update = query.for_update(encode_assignments(table, assignments)?)?;
    if !returning && hooks.is_empty() {
        let count = execute(db, &update).await?.row_count;
        return Ok(UpdateOutcome {
            count,
            rows: Vec::new(),
        });
    }
    let rows = fetch(db, table, &update.returning([SelectItem::All])).await?;
    run_after_hooks(table, "after_update", hooks, &rows)?;
    Ok(UpdateOutcome {
        count: rows.len() as u64,
        rows: if returning { rows } else { Vec::new() },
    })
}

async fn update_nested(
    db: &Db,
    table: &Arc<TableDef>,
    query: Query,
    data: UpdateData,
    returning: bool,
) -> Result<UpdateOutcome> {
    let schema = Arc::clone(db.schema());
    let UpdateData {
        mut assignments,
        relations,
    } = data;
    let scope = query.scope_only();
    let mut deferred: Vec<(Arc<TableDef>, Condition)> = Vec::new();

    for (name, nested) in &relations {
        let relation = Arc::clone(schema.require_relation(table.name(), name)?);
        if let NestedUpdate::ToOne(update) = nested {
            if matches!(relation.kind, RelationKind::BelongsTo { .. }) {
                let (set, delete) = update_belongs_to(db, table, &relation, &scope, update).await?;
                assignments.extend(set);
                deferred.extend(delete);
            }
        }
    }

    let touched = !assignments.is_empty();
    let parents = if touched {
        let update = scope
            .clone()
            .for_update(encode_assignments(table, assignments)?)?
            .returning([SelectItem::All]);
        fetch(db, table, &update).await?
    } else {
        fetch(db, table, &scope).await?
    };

    for (related, condition) in deferred {
        delete_rows(db, &related, related.query().filter(condition)).await?;
    }

    for (name, nested) in relations {
        let relation = Arc::clone(schema.require_relation(table.name(), &name)?);
        match (&relation.kind, nested) {
            (RelationKind::HasMany { .. }, NestedUpdate::ToMany(update)) => {
                update_has_many(db, table.name(), &relation, &parents, update).await?;
            }
            (RelationKind::HasOne { .. }, NestedUpdate::ToOne(update)) => {
                update_has_one(db, table.name(), &relation, &parents, update).await?;
            }
            (RelationKind::HasAndBelongsToMany { .. }, NestedUpdate::ToMany(update)) => {
                update_joined(db, table.name(), &relation, &parents, update).await?;
            }
            _ => {}
        }
    }

    if touched {
        run_after_hooks(table, "after_update", &table.hooks().after_update, &parents)?;
    }
    Ok(UpdateOutcome {
        count: parents.len() as u64,
        rows: if returning { parents } else { Vec::new() },
    })
}

/// Runs the `belongsTo` writes of an update. Returns the assignments to add
/// to the main statement and the deletes to run after it.
async fn update_belongs_to(
    db: &Db,
    table: &Arc<TableDef>,
    relation: &Relation,
    scope: &Query,
    update: &ToOneUpdate,
) -> Result<(Vec<Assignment>, Option<(Arc<TableDef>, Condition)>)> {
    let RelationKind::BelongsTo {
        foreign_keys,
        references,
    } = &relation.kind
    else {
        return Ok((Vec::new(), None));
    };
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let current = || {
        Condition::in_query(
            &column_refs(references),
            scope.clone().select_columns(&column_refs(foreign_keys)),
        )
    };
    let mut assignments = Vec::new();
    let mut deferred = None;

    if let Some(data) = &update.update {
        let query = related.query().filter(current());
        update_rows(db, Arc::clone(&related), query, data.clone(), false).await?;
    }

    if let Some(upsert) = &update.upsert {
        let query = related.query().filter(current());
        let outcome = update_rows(db, Arc::clone(&related), query, upsert.update.clone(), false).await?;
        if outcome.count == 0 {
            let created = create_one(db, &related, upsert.create.clone()).await?;
            assignments.extend(key_assignments(
                foreign_keys,
                &key_tuple(&created, related.name(), references)?,
            ));
        }
    }

    if let Some(condition) = &update.connect {
        let query = related.query().filter(condition.clone()).limit(1);
        let found = fetch(db, &related, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(related.name()))?;
        assignments.extend(key_assignments(
            foreign_keys,
            &key_tuple(&found, related.name(), references)?,
        ));
    }

    if let Some(data) = &update.create {
        let created = create_one(db, &related, data.clone()).await?;
        assignments.extend(key_assignments(
            foreign_keys,
            &key_tuple(&created, related.name(), references)?,
        ));
    }

    if update.disconnect || update.delete {
        if update.delete {
            let select = scope.clone().select_columns(&column_refs(foreign_keys));
            let previous: Vec<Vec<SqlValue>> = execute(db, &select)
                .await?
                .rows
                .iter()
                .map(|row| key_tuple(row, table.name(), foreign_keys))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|key| key.iter().all(|v| !v.is_null()))
                .collect();
            if !previous.is_empty() {
                deferred = Some((Arc::clone(&related), in_keys(references, previous)));
            }
        }
        assignments.extend(null_assignments(foreign_keys));
    }

    Ok((assignments, deferred))
}

async fn create_one(db: &Db, table: &Arc<TableDef>, data: CreateData) -> Result<Record> {
    create_records(db, Arc::clone(table), vec![data], InsertOptions::default())
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| not_found(table.name()))
}

fn single_parent<'a>(
    owner: &str,
    relation: &Relation,
    keys: &'a [Vec<SqlValue>],
    operation: &str,
) -> Result<&'a [SqlValue]> {
    match keys {
        [key] => Ok(key.as_slice()),
        _ => Err(invalid(
            owner,
            &relation.name,
            format!("{operation} needs exactly one parent record, found {}", keys.len()),
        )),
    }
}

/// Creates `items` once for every parent key.
async fn create_for_parents(
    db: &Db,
    related: &Arc<TableDef>,
    foreign_keys: &[String],
    parents: &[Vec<SqlValue>],
    items: &[CreateData],
) -> Result<Vec<Record>> {
    let mut data = Vec::with_capacity(parents.len() * items.len());
    for key in parents {
        for item in items {
            let mut item = item.clone();
            assign_keys(&mut item.values, foreign_keys, key);
            data.push(item);
        }
    }
    let options = InsertOptions {
        on_conflict: None,
        shared: foreign_keys.to_vec(),
    };
    create_records(db, Arc::clone(related), data, options).await
}

async fn update_has_many(
    db: &Db,
    owner: &str,
    relation: &Relation,
    parents: &[Record],
    update: ToManyUpdate,
) -> Result<()> {
    let Some(keys) = owned_keys(relation) else {
        return Ok(());
    };
    if parents.is_empty() {
        return Ok(());
    }
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let tuples = key_tuples(parents, owner, keys.primary_keys)?;
    let children = || in_keys(keys.foreign_keys, tuples.clone());

    if let Some(conditions) = update.set.filter(|c| !c.is_empty()) {
        let key = single_parent(owner, relation, &tuples, "set")?;
        assign_where(db, &related, children(), null_assignments(keys.foreign_keys)).await?;
        assign_where(
            db,
            &related,
            Condition::or_any(conditions),
            key_assignments(keys.foreign_keys, key),
        )
        .await?;
    }

    if !update.delete.is_empty() {
        let query = related
            .query()
            .filter(children())
            .filter(Condition::or_any(update.delete));
        delete_rows(db, &related, query).await?;
    }

    if !update.disconnect.is_empty() {
        let condition = children().and(Condition::or_any(update.disconnect));
        assign_where(db, &related, condition, null_assignments(keys.foreign_keys)).await?;
    }

    if let Some((conditions, data)) = update.update.filter(|(c, _)| !c.is_empty()) {
        let query = related
            .query()
            .filter(children())
            .filter(Condition::or_any(conditions));
        update_rows(db, Arc::clone(&related), query, data, false).await?;
    }

    if !update.connect.is_empty() {
        let key = single_parent(owner, relation, &tuples, "connect")?;
        assign_where(
            db,
            &related,
            Condition::or_any(update.connect),
            key_assignments(keys.foreign_keys, key),
        )
        .await?;
    }

    if !update.create.is_empty() {
        create_for_parents(db, &related, keys.foreign_keys, &tuples, &update.create).await?;
    }
    Ok(())
}

async fn update_has_one(
    db: &Db,
    owner: &str,
    relation: &Relation,
    parents: &[Record],
    update: ToOneUpdate,
) -> Result<()> {
    let Some(keys) = owned_keys(relation) else {
        return Ok(());
    };
    if parents.is_empty() {
        return Ok(());
    }
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let tuples = key_tuples(parents, owner, keys.primary_keys)?;
    let children = || in_keys(keys.foreign_keys, tuples.clone());

    if let Some(data) = update.update {
        let query = related.query().filter(children());
        update_rows(db, Arc::clone(&related), query, data, false).await?;
    }

    if let Some(upsert) = update.upsert {
        let query = related.query().filter(children());
        let outcome = update_rows(db, Arc::clone(&related), query, upsert.update, false).await?;
        if outcome.count == 0 {
            create_for_parents(db, &related, keys.foreign_keys, &tuples, &[upsert.create]).await?;
        }
    }

    if update.delete {
        delete_rows(db, &related, related.query().filter(children())).await?;
    } else if update.disconnect {
        assign_where(db, &related, children(), null_assignments(keys.foreign_keys)).await?;
    }

    if let Some(condition) = update.connect {
        let key = single_parent(owner, relation, &tuples, "connect")?;
        assign_where(db, &related, children(), null_assignments(keys.foreign_keys)).await?;
        assign_where(db, &related, condition, key_assignments(keys.foreign_keys, key)).await?;
    }

    if let Some(data) = update.create {
        assign_where(db, &related, children(), null_assignments(keys.foreign_keys)).await?;
        create_for_parents(db, &related, keys.foreign_keys, &tuples, &[data]).await?;
    }
    Ok(())
}

/// Every `(parent, related)` key pair.
fn cross(parents: &[Vec<SqlValue>], related: &[Vec<SqlValue>]) -> Vec<(Vec<SqlValue>, Vec<SqlValue>)> {
    parents
        .iter()
        .flat_map(|p| related.iter().map(move |r| (p.clone(), r.clone())))
        .collect()
}

async fn update_joined(
    db: &Db,
    owner: &str,
    relation: &Relation,
    parents: &[Record],
    update: ToManyUpdate,
) -> Result<()> {
    let Some(keys) = join_keys(relation) else {
        return Ok(());
    };
    if parents.is_empty() {
        return Ok(());
    }
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let tuples = key_tuples(parents, owner, keys.primary_keys)?;
    let join = db.schema().query_on(keys.join_table);
    let links = || in_keys(keys.foreign_keys, tuples.clone());
    let matching = |conditions: Vec<Condition>| {
        related
            .query()
            .filter(Condition::or_any(conditions))
            .select_columns(&column_refs(keys.association_primary_keys))
    };
    let linked_to = |query: Query| {
        Condition::in_query(&column_refs(keys.association_foreign_keys), query)
    };

    if !update.create.is_empty() {
        let created =
            create_records(db, Arc::clone(&related), update.create, InsertOptions::default()).await?;
        let ids = key_tuples(&created, related.name(), keys.association_primary_keys)?;
        insert_join_rows(db, &keys, cross(&tuples, &ids)).await?;
    }

    if !update.connect.is_empty() {
        let query = related.query().filter(Condition::or_any(update.connect));
        let rows = fetch(db, &related, &query).await?;
        if rows.is_empty() {
            return Err(not_found(related.name()));
        }
        let ids = key_tuples(&rows, related.name(), keys.association_primary_keys)?;
        insert_join_rows(db, &keys, cross(&tuples, &ids)).await?;
    }

    if let Some((conditions, data)) = update.update.filter(|(c, _)| !c.is_empty()) {
        let alias = related.name().to_string();
        let join_alias = join_table_alias(&relation.name, keys.join_table, &[&alias]);
        let correlated = keys
            .association_foreign_keys
            .iter()
            .zip(keys.association_primary_keys)
            .map(|(afk, apk)| Condition::columns_eq(&format!("{join_alias}.{afk}"), &format!("{alias}.{apk}")));
        let linked = keys
            .foreign_keys
            .iter()
            .map(|c| format!("{join_alias}.{c}"))
            .collect::<Vec<_>>();
        let exists = Condition::exists(
            join.clone()
                .with_alias(&join_alias)
                .filter(Condition::and_all(correlated))
                .filter(in_keys(&linked, tuples.clone())),
        );
        let query = related
            .query()
            .filter(Condition::or_any(conditions))
            .filter(exists);
        update_rows(db, Arc::clone(&related), query, data, false).await?;
    }

    if !update.disconnect.is_empty() {
        let query = join
            .clone()
            .filter(links())
            .filter(linked_to(matching(update.disconnect)))
            .for_delete()?;
        execute(db, &query).await?;
    }

    if !update.delete.is_empty() {
        let query = join
            .clone()
            .filter(links())
            .filter(linked_to(matching(update.delete)))
            .for_delete()?
            .returning(
                keys.association_foreign_keys
                    .iter()
                    .map(|c| SelectItem::column(c)),
            );
        let removed = execute(db, &query)
            .await?
            .rows
            .iter()
            .map(|row| key_tuple(row, keys.join_table, keys.association_foreign_keys))
            .collect::<Result<Vec<_>>>()?;
        if !removed.is_empty() {
            let query = related
                .query()
                .filter(in_keys(keys.association_primary_keys, removed));
            delete_rows(db, &related, query).await?;
        }
    }

    if let Some(conditions) = update.set.filter(|c| !c.is_empty()) {
        execute(db, &join.clone().filter(links()).for_delete()?).await?;
        let rows = execute(db, &matching(conditions)).await?.rows;
        let ids = rows
            .iter()
            .map(|row| key_tuple(row, related.name(), keys.association_primary_keys))
            .collect::<Result<Vec<_>>>()?;
        insert_join_rows(db, &keys, cross(&tuples, &ids)).await?;
    }
    Ok(())
}
