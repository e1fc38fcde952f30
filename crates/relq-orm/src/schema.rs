//! Table and relation definitions.
//!
//! A [`Schema`] is assembled once with a [`SchemaBuilder`] and shared
//! read-only by every query afterwards. [`SchemaBuilder::build`] rejects
//! relations that name unknown tables or columns, and resolves through
//! relations (recursively, rejecting cycles) so nothing about relations can
//! fail at query time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relq_core::{ColumnShape, Query, SqlValue};

use crate::error::{BoxError, OrmError, Result};
use crate::record::Record;
use crate::relations::{Relation, RelationKind};

/// Converts a value on its way to or from the database.
pub type Codec = Arc<dyn Fn(SqlValue) -> std::result::Result<SqlValue, BoxError> + Send + Sync>;

/// Runs before a batch of rows is inserted and may change them.
pub type BeforeCreateHook =
    Arc<dyn Fn(&mut [Record]) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Runs after a batch of rows was written.
pub type AfterWriteHook = Arc<dyn Fn(&[Record]) -> std::result::Result<(), BoxError> + Send + Sync>;

/// A column of a table.
#[derive(Clone)]
pub struct ColumnDef {
    key: String,
    db_name: Option<String>,
    nullable: bool,
    primary_key: bool,
    has_default: bool,
    encode: Option<Codec>,
    decode: Option<Codec>,
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("key", &self.key)
            .field("db_name", &self.db_name)
            .field("nullable", &self.nullable)
            .field("primary_key", &self.primary_key)
            .field("has_default", &self.has_default)
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

impl ColumnDef {
    /// Creates a non-nullable column.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            db_name: None,
            nullable: false,
            primary_key: false,
            has_default: false,
            encode: None,
            decode: None,
        }
    }

    /// Marks the column as part of the primary key. Primary keys have a
    /// database default unless stated otherwise.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.has_default = true;
        self
    }

    /// Allows NULL.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column as having a database default.
    #[must_use]
    pub const fn has_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Stores the column under a different database name.
    #[must_use]
    pub fn rename(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Sets the function applied to values before they are bound.
    #[must_use]
    pub fn encode(
        mut self,
        f: impl Fn(SqlValue) -> std::result::Result<SqlValue, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.encode = Some(Arc::new(f));
        self
    }

    /// Sets the function applied to values read back.
    #[must_use]
    pub fn decode(
        mut self,
        f: impl Fn(SqlValue) -> std::result::Result<SqlValue, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.decode = Some(Arc::new(f));
        self
    }

    /// Application-facing key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Database column name.
    #[must_use]
    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.key)
    }

    /// Whether NULL is allowed.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the column is part of the primary key.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }
}

/// Per-table callbacks. Each runs once per batch.
#[derive(Clone, Default)]
pub struct TableHooks {
    pub(crate) before_create: Vec<BeforeCreateHook>,
    pub(crate) after_create: Vec<AfterWriteHook>,
    pub(crate) after_update: Vec<AfterWriteHook>,
    pub(crate) after_delete: Vec<AfterWriteHook>,
}

impl fmt::Debug for TableHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHooks")
            .field("before_create", &self.before_create.len())
            .field("after_create", &self.after_create.len())
            .field("after_update", &self.after_update.len())
            .field("after_delete", &self.after_delete.len())
            .finish()
    }
}

/// A table: its columns and hooks.
#[derive(Debug, Clone)]
pub struct TableDef {
    name: String,
    schema: Option<String>,
    columns: Vec<ColumnDef>,
    hooks: TableHooks,
    shape: Arc<ColumnShape>,
}

impl TableDef {
    /// Creates a table without columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            hooks: TableHooks::default(),
            shape: Arc::new(ColumnShape::new()),
        }
    }

    /// Sets the database schema the table lives in.
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Registers a hook run before rows are inserted.
    #[must_use]
    pub fn before_create(
        mut self,
        f: impl Fn(&mut [Record]) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.before_create.push(Arc::new(f));
        self
    }

    /// Registers a hook run after rows are inserted.
    #[must_use]
    pub fn after_create(
        mut self,
        f: impl Fn(&[Record]) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.after_create.push(Arc::new(f));
        self
    }

    /// Registers a hook run after rows are updated.
    #[must_use]
    pub fn after_update(
        mut self,
        f: impl Fn(&[Record]) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.after_update.push(Arc::new(f));
        self
    }

    /// Registers a hook run after rows are deleted.
    #[must_use]
    pub fn after_delete(
        mut self,
        f: impl Fn(&[Record]) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.after_delete.push(Arc::new(f));
        self
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column by key.
    #[must_use]
    pub fn find_column(&self, key: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Primary key column keys.
    #[must_use]
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.key.as_str())
            .collect()
    }

    /// Key to database name mapping.
    #[must_use]
    pub const fn shape(&self) -> &Arc<ColumnShape> {
        &self.shape
    }

    pub(crate) const fn hooks(&self) -> &TableHooks {
        &self.hooks
    }

    /// A fresh descriptor on this table.
    #[must_use]
    pub fn query(&self) -> Query {
        let query = Query::table(self.name.clone()).with_shape(Arc::clone(&self.shape));
        match &self.schema {
            Some(schema) => query.schema(schema),
            None => query,
        }
    }

    /// Applies the column encoder, if any.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Codec`] if the encoder fails.
    pub fn encode(&self, key: &str, value: SqlValue) -> Result<SqlValue> {
        self.apply(key, value, |c| c.encode.as_ref())
    }

    /// Applies the column decoder, if any.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Codec`] if the decoder fails.
    pub fn decode(&self, key: &str, value: SqlValue) -> Result<SqlValue> {
        self.apply(key, value, |c| c.decode.as_ref())
    }

    fn apply(
        &self,
        key: &str,
        value: SqlValue,
        pick: impl Fn(&ColumnDef) -> Option<&Codec>,
    ) -> Result<SqlValue> {
        match self.find_column(key).and_then(pick) {
            Some(codec) => codec(value).map_err(|source| OrmError::Codec {
                table: self.name.clone(),
                column: key.to_string(),
                source,
            }),
            None => Ok(value),
        }
    }

    fn finish(&mut self) {
        let shape = self.columns.iter().fold(ColumnShape::new(), |shape, c| {
            match &c.db_name {
                Some(db) => shape.renamed(&c.key, db),
                None => shape.column(&c.key),
            }
        });
        self.shape = Arc::new(shape);
    }
}

/// A relation as declared, before resolution.
#[derive(Debug, Clone)]
struct RelationDecl {
    owner: String,
    name: String,
    related: Option<String>,
    kind: RelationKind,
}

/// Collects tables and relations.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
    relations: Vec<RelationDecl>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// `owner.foreign_keys` reference `related.references`.
    #[must_use]
    pub fn belongs_to(
        self,
        owner: &str,
        name: &str,
        related: &str,
        foreign_keys: &[&str],
        references: &[&str],
    ) -> Self {
        self.relation(
            owner,
            name,
            Some(related),
            RelationKind::BelongsTo {
                foreign_keys: strings(foreign_keys),
                references: strings(references),
            },
        )
    }

    /// `related.foreign_keys` reference `owner.primary_keys`; at most one
    /// related row.
    #[must_use]
    pub fn has_one(
        self,
        owner: &str,
        name: &str,
        related: &str,
        primary_keys: &[&str],
        foreign_keys: &[&str],
    ) -> Self {
        self.relation(
            owner,
            name,
            Some(related),
            RelationKind::HasOne {
                primary_keys: strings(primary_keys),
                foreign_keys: strings(foreign_keys),
            },
        )
    }

    /// `related.foreign_keys` reference `owner.primary_keys`.
    #[must_use]
    pub fn has_many(
        self,
        owner: &str,
        name: &str,
        related: &str,
        primary_keys: &[&str],
        foreign_keys: &[&str],
    ) -> Self {
        self.relation(
            owner,
            name,
            Some(related),
            RelationKind::HasMany {
                primary_keys: strings(primary_keys),
                foreign_keys: strings(foreign_keys),
            },
        )
    }

    /// Many-to-many through a join table.
    #[must_use]
    pub fn has_and_belongs_to_many(
        self,
        owner: &str,
        name: &str,
        related: &str,
        keys: JoinTableKeys<'_>,
    ) -> Self {
        self.relation(
            owner,
            name,
            Some(related),
            RelationKind::HasAndBelongsToMany {
                primary_keys: strings(keys.primary_keys),
                join_table: keys.join_table.to_string(),
                foreign_keys: strings(keys.foreign_keys),
                association_foreign_keys: strings(keys.association_foreign_keys),
                association_primary_keys: strings(keys.association_primary_keys),
            },
        )
    }

    /// Follows `through` on the owner, then `source` on its target.
    #[must_use]
    pub fn through(self, owner: &str, name: &str, through: &str, source: &str) -> Self {
        self.relation(
            owner,
            name,
            None,
            RelationKind::Through {
                through: through.to_string(),
                source: source.to_string(),
            },
        )
    }

    fn relation(mut self, owner: &str, name: &str, related: Option<&str>, kind: RelationKind) -> Self {
        self.relations.push(RelationDecl {
            owner: owner.to_string(),
            name: name.to_string(),
            related: related.map(str::to_string),
            kind,
        });
        self
    }

    /// Validates and freezes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownTable`], [`OrmError::InvalidRelation`] or
    /// [`OrmError::CyclicRelation`].
    pub fn build(self) -> Result<Schema> {
        let mut tables = BTreeMap::new();
        for mut table in self.tables {
            table.finish();
            tables.insert(table.name.clone(), Arc::new(table));
        }

        let mut decls: BTreeMap<(String, String), RelationDecl> = BTreeMap::new();
        for decl in self.relations {
            if !tables.contains_key(&decl.owner) {
                return Err(OrmError::UnknownTable(decl.owner));
            }
            let key = (decl.owner.clone(), decl.name.clone());
            if decls.contains_key(&key) {
                return Err(invalid(&decl.owner, &decl.name, "declared twice"));
            }
            decls.insert(key, decl);
        }

        let mut resolver = Resolver {
            tables: &tables,
            decls: &decls,
            resolved: BTreeMap::new(),
        };
        for key in decls.keys() {
            resolver.resolve(&key.0, &key.1, &mut Vec::new())?;
        }
        let relations = resolver.resolved;

        Ok(Schema { tables, relations })
    }
}

/// Column sets of a many-to-many relation.
#[derive(Debug, Clone, Copy)]
pub struct JoinTableKeys<'a> {
    /// Owner columns referenced from the join table.
    pub primary_keys: &'a [&'a str],
    /// Join table name.
    pub join_table: &'a str,
    /// Join table columns referencing the owner.
    pub foreign_keys: &'a [&'a str],
    /// Join table columns referencing the related table.
    pub association_foreign_keys: &'a [&'a str],
    /// Related table columns referenced from the join table.
    pub association_primary_keys: &'a [&'a str],
}

struct Resolver<'a> {
    tables: &'a BTreeMap<String, Arc<TableDef>>,
    decls: &'a BTreeMap<(String, String), RelationDecl>,
    resolved: BTreeMap<(String, String), Arc<Relation>>,
}

impl Resolver<'_> {
    fn resolve(&mut self, owner: &str, name: &str, path: &mut Vec<String>) -> Result<Arc<Relation>> {
        let key = (owner.to_string(), name.to_string());
        if let Some(relation) = self.resolved.get(&key) {
            return Ok(Arc::clone(relation));
        }
        let step = format!("{owner}.{name}");
        if path.contains(&step) {
            path.push(step);
            return Err(OrmError::CyclicRelation {
                path: path.join(" -> "),
            });
        }
        let decl = self
            .decls
            .get(&key)
            .ok_or_else(|| invalid(owner, name, "no such relation"))?;

        let relation = match &decl.kind {
            RelationKind::Through { through, source } => {
                path.push(step);
                let through_rel = self.resolve(owner, through, path)?;
                let source_rel = self.resolve(&through_rel.related, source, path)?;
                path.pop();
                Relation {
                    name: name.to_string(),
                    owner: owner.to_string(),
                    related: source_rel.related.clone(),
                    kind: decl.kind.clone(),
                    chain: Some((through_rel, source_rel)),
                }
            }
            kind => {
                let related = decl
                    .related
                    .as_deref()
                    .ok_or_else(|| invalid(owner, name, "missing related table"))?;
                self.check_keys(owner, name, related, kind)?;
                Relation {
                    name: name.to_string(),
                    owner: owner.to_string(),
                    related: related.to_string(),
                    kind: kind.clone(),
                    chain: None,
                }
            }
        };
        let relation = Arc::new(relation);
        self.resolved.insert(key, Arc::clone(&relation));
        Ok(relation)
    }

    fn check_keys(&self, owner: &str, name: &str, related: &str, kind: &RelationKind) -> Result<()> {
        let owner_table = self.table(owner)?;
        let related_table = self.table(related)?;
        let check = |table: &TableDef, columns: &[String]| -> Result<()> {
            if columns.is_empty() {
                return Err(invalid(owner, name, "empty key column list"));
            }
            for column in columns {
                if table.find_column(column).is_none() {
                    return Err(invalid(
                        owner,
                        name,
                        &format!("`{}` has no column `{column}`", table.name),
                    ));
                }
            }
            Ok(())
        };
        let (left, right) = match kind {
            RelationKind::BelongsTo {
                foreign_keys,
                references,
            } => {
                check(owner_table, foreign_keys)?;
                check(related_table, references)?;
                (foreign_keys, references)
            }
            RelationKind::HasOne {
                primary_keys,
                foreign_keys,
            }
            | RelationKind::HasMany {
                primary_keys,
                foreign_keys,
            } => {
                check(owner_table, primary_keys)?;
                check(related_table, foreign_keys)?;
                (primary_keys, foreign_keys)
            }
            RelationKind::HasAndBelongsToMany {
                primary_keys,
                join_table,
                foreign_keys,
                association_foreign_keys,
                association_primary_keys,
            } => {
                check(owner_table, primary_keys)?;
                check(related_table, association_primary_keys)?;
                if let Some(table) = self.tables.get(join_table) {
                    check(table, foreign_keys)?;
                    check(table, association_foreign_keys)?;
                }
                if foreign_keys.len() != primary_keys.len() {
                    return Err(invalid(owner, name, "join table key count mismatch"));
                }
                (association_foreign_keys, association_primary_keys)
            }
            RelationKind::Through { .. } => return Ok(()),
        };
        if left.len() == right.len() {
            Ok(())
        } else {
            Err(invalid(owner, name, "key column counts differ"))
        }
    }

    fn table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| OrmError::UnknownTable(name.to_string()))
    }
}

fn invalid(table: &str, relation: &str, reason: &str) -> OrmError {
    OrmError::InvalidRelation {
        table: table.to_string(),
        relation: relation.to_string(),
        reason: reason.to_string(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Tables and resolved relations.
#[derive(Debug)]
pub struct Schema {
    tables: BTreeMap<String, Arc<TableDef>>,
    relations: BTreeMap<(String, String), Arc<Relation>>,
}

impl Schema {
    /// Starts a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Looks up a table.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownTable`].
    pub fn table(&self, name: &str) -> Result<&Arc<TableDef>> {
        self.tables
            .get(name)
            .ok_or_else(|| OrmError::UnknownTable(name.to_string()))
    }

    /// Looks up a relation of a table.
    #[must_use]
    pub fn relation(&self, table: &str, name: &str) -> Option<&Arc<Relation>> {
        self.relations.get(&(table.to_string(), name.to_string()))
    }

    /// Looks up a relation, failing with `UnknownRelation`.
    ///
    /// # Errors
    ///
    /// Returns [`relq_core::QueryError::UnknownRelation`].
    pub fn require_relation(&self, table: &str, name: &str) -> Result<&Arc<Relation>> {
        self.relation(table, name).ok_or_else(|| {
            relq_core::QueryError::UnknownRelation {
                table: table.to_string(),
                relation: name.to_string(),
            }
            .into()
        })
    }

    /// A descriptor on a table, or on a bare name when the table is not
    /// declared (join tables).
    pub(crate) fn query_on(&self, name: &str) -> Query {
        self.tables
            .get(name)
            .map_or_else(|| Query::table(name), |t| t.query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> SchemaBuilder {
        Schema::builder()
            .table(
                TableDef::new("user")
                    .column(ColumnDef::new("id").primary_key())
                    .column(ColumnDef::new("firstName").rename("first_name")),
            )
            .table(
                TableDef::new("message")
                    .column(ColumnDef::new("id").primary_key())
                    .column(ColumnDef::new("authorId")),
            )
    }

    #[test]
    fn test_shape_is_built_from_columns() {
        let schema = tables().build().unwrap();
        let user = schema.table("user").unwrap();
        assert_eq!(user.shape().db_name("firstName"), Some("first_name"));
        assert_eq!(user.primary_key(), vec!["id"]);
    }

    #[test]
    fn test_unknown_key_column_is_rejected() {
        let err = tables()
            .has_many("user", "messages", "message", &["id"], &["userId"])
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::InvalidRelation { relation, .. } if relation == "messages"));
    }

    #[test]
    fn test_through_with_missing_source_is_rejected() {
        let err = tables()
            .has_many("user", "messages", "message", &["id"], &["authorId"])
            .through("user", "chats", "messages", "chat")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            OrmError::InvalidRelation { table, relation, .. } if table == "message" && relation == "chat"
        ));
    }

    #[test]
    fn test_cyclic_through_is_rejected() {
        let err = tables()
            .through("user", "a", "b", "x")
            .through("user", "b", "a", "y")
            .build()
            .unwrap_err();
        match err {
            OrmError::CyclicRelation { path } => {
                assert_eq!(path, "user.a -> user.b -> user.a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_codecs_are_applied() {
        let schema = Schema::builder()
            .table(
                TableDef::new("t").column(ColumnDef::new("flag").decode(|v| {
                    Ok(SqlValue::Bool(v.as_i64() == Some(1)))
                })),
            )
            .build()
            .unwrap();
        let table = schema.table("t").unwrap();
        assert_eq!(
            table.decode("flag", SqlValue::Int(1)).unwrap(),
            SqlValue::Bool(true)
        );
        assert_eq!(
            table.encode("flag", SqlValue::Int(3)).unwrap(),
            SqlValue::Int(3)
        );
    }
}
