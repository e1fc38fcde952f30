//! Nested create.
//!
//! Order of statements for one batch:
//! 1. `belongsTo` targets: created, connected or looked up, so their keys
//!    can be written into the new rows.
//! 2. The rows themselves, in one `INSERT ... RETURNING *`.
//! 3. `hasOne`/`hasMany` children, pointed at the new keys, and
//!    `hasAndBelongsToMany` targets followed by one join table insert.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use relq_core::{
    val, Condition, InsertData, InsertSource, OnConflict, Query, SelectItem, SqlValue,
};

use super::{
    assign_keys, encode_assignments, execute, fetch, insert_join_rows, insert_rows, invalid,
    join_keys, key_assignments, key_tuple, not_found, owned_keys, run_after_hooks, ConnectOrCreate,
    CreateData, NestedCreate,
};
use crate::db::Db;
use crate::error::{OrmError, Result};
use crate::record::{Record, Related};
use crate::relations::{Relation, RelationKind};
use crate::schema::{Schema, TableDef};

/// Options of one `INSERT`.
#[derive(Debug, Clone, Default)]
pub(crate) struct InsertOptions {
    pub(crate) on_conflict: Option<OnConflict>,
    /// Columns whose equal values share a placeholder.
    pub(crate) shared: Vec<String>,
}

/// Where a query created through a relation gets its parent from.
#[derive(Debug, Clone)]
pub(crate) enum Parent {
    /// Rows matched by a query; the first one is used.
    Query(Query),
    /// A record already loaded.
    Record(Record),
}

type Entries = Vec<(usize, NestedCreate)>;

/// Nested entries of one relation, split by operation. Indices point at the
/// parent record in the batch.
#[derive(Default)]
struct Split {
    create: Vec<(usize, CreateData)>,
    connect: Vec<(usize, Vec<Condition>)>,
    connect_or_create: Vec<(usize, ConnectOrCreate)>,
}

impl Split {
    fn new(entries: Entries) -> Self {
        let mut split = Self::default();
        for (index, nested) in entries {
            split
                .create
                .extend(nested.create.into_iter().map(|data| (index, data)));
            if !nested.connect.is_empty() {
                split.connect.push((index, nested.connect));
            }
            split.connect_or_create.extend(
                nested
                    .connect_or_create
                    .into_iter()
                    .map(|item| (index, item)),
            );
        }
        split
    }
}

/// Creates a batch of records of `table` with their nested writes.
pub(crate) fn create_records<'a>(
    db: &'a Db,
    table: Arc<TableDef>,
    items: Vec<CreateData>,
    options: InsertOptions,
) -> BoxFuture<'a, Result<Vec<Record>>> {
    async move {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&CreateData> = items.iter().collect();
        validate(db.schema(), &table, &refs, options.on_conflict.is_some())?;

        if items.iter().all(|item| item.relations.is_empty()) {
            let records = items.into_iter().map(|item| item.values).collect();
            let created = insert_batch(db, &table, records, &options).await?;
            run_after_hooks(&table, "after_create", &table.hooks().after_create, &created)?;
            return Ok(created);
        }
        db.transaction(|| create_nested(db, &table, items, &options))
            .await
    }
    .boxed()
}

/// Rejects the whole batch before any statement runs.
fn validate(schema: &Schema, table: &TableDef, items: &[&CreateData], on_conflict: bool) -> Result<()> {
    for item in items {
        for (name, nested) in &item.relations {
            let relation = schema.require_relation(table.name(), name)?;
            if on_conflict {
                return Err(invalid(
                    table.name(),
                    name,
                    "nested writes cannot be combined with on conflict",
                ));
            }
            match &relation.kind {
                RelationKind::Through { .. } => {
                    return Err(invalid(table.name(), name, "through relations are read-only"));
                }
                RelationKind::BelongsTo { .. } | RelationKind::HasOne { .. } if nested.len() > 1 => {
                    return Err(invalid(
                        table.name(),
                        name,
                        "a to-one relation takes a single nested record",
                    ));
                }
                RelationKind::HasAndBelongsToMany { .. } if nested.create.len() > 1 => {
                    return Err(OrmError::UnsupportedBatchJoinCreate {
                        table: table.name().to_string(),
                        relation: name.clone(),
                    });
                }
                _ => {}
            }
            let related = schema.table(&relation.related)?;
            let children: Vec<&CreateData> = nested
                .create
                .iter()
                .chain(nested.connect_or_create.iter().map(|item| &item.create))
                .collect();
            validate(schema, related, &children, false)?;
        }
    }
    Ok(())
}

/// Runs `before_create` hooks and inserts the rows.
async fn insert_batch(
    db: &Db,
    table: &Arc<TableDef>,
    mut records: Vec<Record>,
    options: &InsertOptions,
) -> Result<Vec<Record>> {
    for hook in &table.hooks().before_create {
        hook(&mut records).map_err(|source| OrmError::Hook {
            table: table.name().to_string(),
            hook: "before_create",
            source,
        })?;
    }
    let rows = insert_rows(table, &records, &options.shared)?;
    let query = table
        .query()
        .for_insert(InsertData {
            source: InsertSource::Values(rows),
            on_conflict: options.on_conflict.clone(),
        })?
        .returning([SelectItem::All]);
    fetch(db, table, &query).await
}

fn take_entries(nested: &mut [BTreeMap<String, NestedCreate>], name: &str) -> Entries {
    nested
        .iter_mut()
        .enumerate()
        .filter_map(|(index, relations)| relations.remove(name).map(|entry| (index, entry)))
        .collect()
}

async fn create_nested(
    db: &Db,
    table: &Arc<TableDef>,
    items: Vec<CreateData>,
    options: &InsertOptions,
) -> Result<Vec<Record>> {
    let schema = Arc::clone(db.schema());
    let mut records = Vec::with_capacity(items.len());
    let mut nested = Vec::with_capacity(items.len());
    for item in items {
        records.push(item.values);
        nested.push(item.relations);
    }
    let names: BTreeSet<String> = nested.iter().flat_map(|n| n.keys().cloned()).collect();
    let mut attached: Vec<BTreeMap<String, Related>> = vec![BTreeMap::new(); records.len()];

    for name in &names {
        let relation = Arc::clone(schema.require_relation(table.name(), name)?);
        let RelationKind::BelongsTo {
            foreign_keys,
            references,
        } = &relation.kind
        else {
            continue;
        };
        let entries = take_entries(&mut nested, name);
        for (index, record) in link_belongs_to(db, &relation, entries).await? {
            let key = key_tuple(&record, &relation.related, references)?;
            assign_keys(&mut records[index], foreign_keys, &key);
            attached[index].insert(name.clone(), Related::One(Some(Box::new(record))));
        }
    }

    let mut created = insert_batch(db, table, records, options).await?;

    for name in &names {
        let entries = take_entries(&mut nested, name);
        if entries.is_empty() {
            continue;
        }
        let relation = Arc::clone(schema.require_relation(table.name(), name)?);
        let linked = match &relation.kind {
            RelationKind::HasOne { .. } | RelationKind::HasMany { .. } => {
                link_owned(db, table.name(), &relation, &created, entries).await?
            }
            RelationKind::HasAndBelongsToMany { .. } => {
                link_joined(db, table.name(), &relation, &created, entries).await?
            }
            _ => continue,
        };
        for (index, records) in linked {
            let related = if relation.returns_one() {
                Related::One(records.into_iter().next().map(Box::new))
            } else {
                Related::Many(records)
            };
            if let Some(slot) = attached.get_mut(index) {
                slot.insert(name.clone(), related);
            }
        }
    }

    for (record, related) in created.iter_mut().zip(attached) {
        for (name, value) in related {
            record.set_related(&name, value);
        }
    }
    run_after_hooks(table, "after_create", &table.hooks().after_create, &created)?;
    Ok(created)
}

fn parent_key(parents: &[Record], index: usize, owner: &str, columns: &[String]) -> Result<Vec<SqlValue>> {
    let parent = parents.get(index).ok_or_else(|| not_found(owner))?;
    key_tuple(parent, owner, columns)
}

/// Resolves the `belongsTo` target of every entry.
async fn link_belongs_to(db: &Db, relation: &Relation, entries: Entries) -> Result<Vec<(usize, Record)>> {
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let split = Split::new(entries);
    let mut linked = Vec::new();

    let (indices, data): (Vec<usize>, Vec<CreateData>) = split.create.into_iter().unzip();
    let created = create_records(db, Arc::clone(&related), data, InsertOptions::default()).await?;
    linked.extend(indices.into_iter().zip(created));

    for (index, conditions) in split.connect {
        let query = related
            .query()
            .filter(Condition::or_any(conditions))
            .limit(1);
        let record = fetch(db, &related, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(related.name()))?;
        linked.push((index, record));
    }

    linked.extend(find_or_create(db, &related, split.connect_or_create).await?);
    Ok(linked)
}

/// Looks every entry up, then creates the misses in one batch. Results keep
/// the order of the entries.
async fn find_or_create(
    db: &Db,
    related: &Arc<TableDef>,
    items: Vec<(usize, ConnectOrCreate)>,
) -> Result<Vec<(usize, Record)>> {
    let mut slots: Vec<(usize, Option<Record>)> = Vec::with_capacity(items.len());
    let mut missing = Vec::new();
    for (index, item) in items {
        let query = related.query().filter(item.condition).limit(1);
        let found = fetch(db, related, &query).await?.into_iter().next();
        if found.is_none() {
            missing.push((slots.len(), item.create));
        }
        slots.push((index, found));
    }
    fill_slots(db, related, &mut slots, missing, InsertOptions::default()).await?;
    Ok(slots
        .into_iter()
        .filter_map(|(index, record)| record.map(|r| (index, r)))
        .collect())
}

async fn fill_slots(
    db: &Db,
    related: &Arc<TableDef>,
    slots: &mut [(usize, Option<Record>)],
    missing: Vec<(usize, CreateData)>,
    options: InsertOptions,
) -> Result<()> {
    let (positions, data): (Vec<usize>, Vec<CreateData>) = missing.into_iter().unzip();
    let created = create_records(db, Arc::clone(related), data, options).await?;
    for (position, record) in positions.into_iter().zip(created) {
        slots[position].1 = Some(record);
    }
    Ok(())
}

/// `hasOne`/`hasMany` entries of freshly inserted parents.
async fn link_owned(
    db: &Db,
    owner: &str,
    relation: &Relation,
    parents: &[Record],
    entries: Entries,
) -> Result<Vec<(usize, Vec<Record>)>> {
    let Some(keys) = owned_keys(relation) else {
        return Ok(Vec::new());
    };
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let split = Split::new(entries);
    let mut linked: BTreeMap<usize, Vec<Record>> = BTreeMap::new();
    let shared = InsertOptions {
        on_conflict: None,
        shared: keys.foreign_keys.to_vec(),
    };

    for (index, conditions) in split.connect {
        let key = parent_key(parents, index, owner, keys.primary_keys)?;
        let query = related
            .query()
            .filter(Condition::or_any(conditions))
            .for_update(encode_assignments(&related, key_assignments(keys.foreign_keys, &key))?)?
            .returning([SelectItem::All]);
        let rows = fetch(db, &related, &query).await?;
        linked.entry(index).or_default().extend(rows);
    }

    let mut slots: Vec<(usize, Option<Record>)> = Vec::new();
    let mut missing = Vec::new();
    for (index, item) in split.connect_or_create {
        let key = parent_key(parents, index, owner, keys.primary_keys)?;
        let query = related
            .query()
            .filter(item.condition)
            .for_update(encode_assignments(&related, key_assignments(keys.foreign_keys, &key))?)?
            .returning([SelectItem::All]);
        let found = fetch(db, &related, &query).await?.into_iter().next();
        if found.is_none() {
            let mut data = item.create;
            assign_keys(&mut data.values, keys.foreign_keys, &key);
            missing.push((slots.len(), data));
        }
        slots.push((index, found));
    }
    fill_slots(db, &related, &mut slots, missing, shared.clone()).await?;
    for (index, record) in slots {
        linked.entry(index).or_default().extend(record);
    }

    let mut indices = Vec::with_capacity(split.create.len());
    let mut data = Vec::with_capacity(split.create.len());
    for (index, mut item) in split.create {
        let key = parent_key(parents, index, owner, keys.primary_keys)?;
        assign_keys(&mut item.values, keys.foreign_keys, &key);
        indices.push(index);
        data.push(item);
    }
    let created = create_records(db, Arc::clone(&related), data, shared).await?;
    for (index, record) in indices.into_iter().zip(created) {
        linked.entry(index).or_default().push(record);
    }

    Ok(linked.into_iter().collect())
}

/// `hasAndBelongsToMany` entries of freshly inserted parents. All join rows
/// go into one insert.
async fn link_joined(
    db: &Db,
    owner: &str,
    relation: &Relation,
    parents: &[Record],
    entries: Entries,
) -> Result<Vec<(usize, Vec<Record>)>> {
    let Some(keys) = join_keys(relation) else {
        return Ok(Vec::new());
    };
    let related = Arc::clone(db.schema().table(&relation.related)?);
    let split = Split::new(entries);
    let mut linked: BTreeMap<usize, Vec<Record>> = BTreeMap::new();
    let mut pairs = Vec::new();

    let (indices, data): (Vec<usize>, Vec<CreateData>) = split.create.into_iter().unzip();
    let created = create_records(db, Arc::clone(&related), data, InsertOptions::default()).await?;
    for (index, record) in indices.into_iter().zip(created) {
        pairs.push((
            parent_key(parents, index, owner, keys.primary_keys)?,
            key_tuple(&record, related.name(), keys.association_primary_keys)?,
        ));
        linked.entry(index).or_default().push(record);
    }

    for (index, conditions) in split.connect {
        let query = related.query().filter(Condition::or_any(conditions));
        let rows = fetch(db, &related, &query).await?;
        if rows.is_empty() {
            return Err(not_found(related.name()));
        }
        let key = parent_key(parents, index, owner, keys.primary_keys)?;
        for record in rows {
            pairs.push((
                key.clone(),
                key_tuple(&record, related.name(), keys.association_primary_keys)?,
            ));
            linked.entry(index).or_default().push(record);
        }
    }

    for (index, record) in find_or_create(db, &related, split.connect_or_create).await? {
        pairs.push((
            parent_key(parents, index, owner, keys.primary_keys)?,
            key_tuple(&record, related.name(), keys.association_primary_keys)?,
        ));
        linked.entry(index).or_default().push(record);
    }

    insert_join_rows(db, &keys, pairs).await?;
    Ok(linked.into_iter().collect())
}

/// Creates records of `table` related to `parent` through `relation`, a
/// relation of `parent_table`.
pub(crate) async fn create_related(
    db: &Db,
    table: Arc<TableDef>,
    relation: &Relation,
    parent_table: &TableDef,
    parent: &Parent,
    mut items: Vec<CreateData>,
    on_conflict: Option<OnConflict>,
) -> Result<Vec<Record>> {
    let owner = parent_table.name();
    if let Some(keys) = owned_keys(relation) {
        let key = match parent {
            Parent::Record(record) => key_tuple(record, owner, keys.primary_keys)?,
            Parent::Query(query) if items.len() == 1 && items[0].relations.is_empty() => {
                let item = items.remove(0);
                let record = insert_from_parent(
                    db,
                    &table,
                    owner,
                    query,
                    keys.primary_keys,
                    keys.foreign_keys,
                    item,
                    on_conflict,
                )
                .await?;
                return Ok(vec![record]);
            }
            Parent::Query(query) => first_parent_key(db, parent_table, query, keys.primary_keys).await?,
        };
        for item in &mut items {
            assign_keys(&mut item.values, keys.foreign_keys, &key);
        }
        let options = InsertOptions {
            on_conflict,
            shared: keys.foreign_keys.to_vec(),
        };
        return create_records(db, table, items, options).await;
    }

    let Some(keys) = join_keys(relation) else {
        return Err(invalid(
            owner,
            &relation.name,
            format!("records cannot be created through a {} relation", relation.kind.name()),
        ));
    };
    let options = InsertOptions {
        on_conflict,
        shared: Vec::new(),
    };
    match parent {
        Parent::Record(record) => {
            let key = key_tuple(record, owner, keys.primary_keys)?;
            db.transaction(|| async move {
                let created = create_records(db, Arc::clone(&table), items, options).await?;
                let pairs = created
                    .iter()
                    .map(|r| {
                        Ok((
                            key.clone(),
                            key_tuple(r, table.name(), keys.association_primary_keys)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                insert_join_rows(db, &keys, pairs).await?;
                Ok::<_, OrmError>(created)
            })
            .await
        }
        Parent::Query(_) if items.len() > 1 => Err(OrmError::UnsupportedBatchJoinCreate {
            table: owner.to_string(),
            relation: relation.name.clone(),
        }),
        Parent::Query(query) => {
            db.transaction(|| async move {
                let created = create_records(db, Arc::clone(&table), items, options).await?;
                let Some(record) = created.first() else {
                    return Ok(created);
                };
                let related_key = key_tuple(record, table.name(), keys.association_primary_keys)?;
                let alias = query.alias().to_string();
                let select = keys
                    .primary_keys
                    .iter()
                    .zip(keys.foreign_keys)
                    .map(|(pk, fk)| SelectItem::column_as(&format!("{alias}.{pk}"), fk))
                    .chain(related_key.into_iter().map(|value| SelectItem::Expr {
                        expr: val(value),
                        alias: None,
                    }));
                let source = query.clone().scope_only().select(select).limit(1);
                let columns = keys
                    .foreign_keys
                    .iter()
                    .chain(keys.association_foreign_keys)
                    .cloned()
                    .collect();
                let insert = db.schema().query_on(keys.join_table).for_insert(InsertData {
                    source: InsertSource::Select {
                        columns,
                        query: Box::new(source),
                    },
                    on_conflict: None,
                })?;
                if execute(db, &insert).await?.row_count == 0 {
                    return Err(not_found(owner));
                }
                Ok::<_, OrmError>(created)
            })
            .await
        }
    }
}

async fn first_parent_key(
    db: &Db,
    parent_table: &TableDef,
    query: &Query,
    columns: &[String],
) -> Result<Vec<SqlValue>> {
    let alias = query.alias().to_string();
    let select: Vec<SelectItem> = columns
        .iter()
        .map(|c| SelectItem::column_as(&format!("{alias}.{c}"), c))
        .collect();
    let query = query.clone().scope_only().select(select).limit(1);
    let result = execute(db, &query).await?;
    let row = result
        .rows
        .into_iter()
        .next()
        .ok_or_else(|| not_found(parent_table.name()))?;
    key_tuple(&row, parent_table.name(), columns)
}

/// `INSERT INTO child (fk, ...) SELECT parent.pk, $values FROM parent ...`,
/// reading the parent key in the same statement.
#[allow(clippy::too_many_arguments)]
async fn insert_from_parent(
    db: &Db,
    table: &Arc<TableDef>,
    owner: &str,
    parent: &Query,
    primary_keys: &[String],
    foreign_keys: &[String],
    item: CreateData,
    on_conflict: Option<OnConflict>,
) -> Result<Record> {
    let mut records = vec![item.values];
    for hook in &table.hooks().before_create {
        hook(&mut records).map_err(|source| OrmError::Hook {
            table: table.name().to_string(),
            hook: "before_create",
            source,
        })?;
    }
    let values = records.pop().unwrap_or_default();

    let alias = parent.alias().to_string();
    let mut columns: Vec<String> = foreign_keys.to_vec();
    let mut select: Vec<SelectItem> = primary_keys
        .iter()
        .zip(foreign_keys)
        .map(|(pk, fk)| SelectItem::column_as(&format!("{alias}.{pk}"), fk))
        .collect();
    for (key, value) in values.into_values() {
        if foreign_keys.contains(&key) {
            continue;
        }
        select.push(SelectItem::Expr {
            expr: val(table.encode(&key, value)?),
            alias: None,
        });
        columns.push(key);
    }

    let source = parent.clone().scope_only().select(select).limit(1);
    let query = table
        .query()
        .for_insert(InsertData {
            source: InsertSource::Select {
                columns,
                query: Box::new(source),
            },
            on_conflict,
        })?
        .returning([SelectItem::All]);
    let created = fetch(db, table, &query).await?;
    if created.is_empty() {
        return Err(not_found(owner));
    }
    run_after_hooks(table, "after_create", &table.hooks().after_create, &created)?;
    Ok(created.into_iter().next().unwrap_or_default())
}
