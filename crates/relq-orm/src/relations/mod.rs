//! Relation kinds and the correlation predicates they produce.
//!
//! Every kind answers two questions:
//! - [`join_condition`]: how does a child alias correlate to a parent alias?
//!   Used for `JOIN ... ON`, for correlated sub-selects and for chained
//!   relation queries.
//! - [`method_condition`]: which child rows belong to this concrete parent
//!   record? The parent's key values are bound as parameters.
//!
//! `through` relations compose both answers of their two steps, nesting the
//! child correlation inside an `EXISTS` on the intermediate table.

use std::sync::Arc;

use relq_core::{
    combine, Combinator, Condition, JoinResolver, QueryError, ResolvedJoin, SqlValue,
};

use crate::error::{OrmError, Result};
use crate::record::Record;
use crate::schema::Schema;

/// How two tables are related.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// The owner holds the foreign key.
    BelongsTo {
        /// Owner columns.
        foreign_keys: Vec<String>,
        /// Related columns they reference.
        references: Vec<String>,
    },
    /// The related table holds the foreign key; at most one row.
    HasOne {
        /// Owner columns referenced.
        primary_keys: Vec<String>,
        /// Related columns referencing them.
        foreign_keys: Vec<String>,
    },
    /// The related table holds the foreign key.
    HasMany {
        /// Owner columns referenced.
        primary_keys: Vec<String>,
        /// Related columns referencing them.
        foreign_keys: Vec<String>,
    },
    /// Pairs of keys stored in a join table.
    HasAndBelongsToMany {
        /// Owner columns referenced.
        primary_keys: Vec<String>,
        /// Join table.
        join_table: String,
        /// Join table columns referencing the owner.
        foreign_keys: Vec<String>,
        /// Join table columns referencing the related table.
        association_foreign_keys: Vec<String>,
        /// Related columns referenced.
        association_primary_keys: Vec<String>,
    },
    /// Composition of a relation of the owner and a relation of its target.
    Through {
        /// Relation on the owner.
        through: String,
        /// Relation on the intermediate table.
        source: String,
    },
}

impl RelationKind {
    /// Short name used in messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BelongsTo { .. } => "belongsTo",
            Self::HasOne { .. } => "hasOne",
            Self::HasMany { .. } => "hasMany",
            Self::HasAndBelongsToMany { .. } => "hasAndBelongsToMany",
            Self::Through { .. } => "through",
        }
    }
}

/// A resolved relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation name; also the default alias of the related table.
    pub name: String,
    /// Owner table.
    pub owner: String,
    /// Related table, after following any through chain.
    pub related: String,
    /// Declared kind.
    pub kind: RelationKind,
    pub(crate) chain: Option<(Arc<Relation>, Arc<Relation>)>,
}

impl Relation {
    /// Whether the relation yields at most one row.
    #[must_use]
    pub fn returns_one(&self) -> bool {
        match (&self.kind, &self.chain) {
            (RelationKind::BelongsTo { .. } | RelationKind::HasOne { .. }, _) => true,
            (RelationKind::Through { .. }, Some((through, source))) => {
                through.returns_one() && source.returns_one()
            }
            _ => false,
        }
    }

    /// The intermediate and source relations of a through relation.
    pub(crate) fn chain(&self) -> Option<(&Self, &Self)> {
        self.chain.as_ref().map(|(a, b)| (a.as_ref(), b.as_ref()))
    }
}

fn path(alias: &str, column: &str) -> String {
    format!("{alias}.{column}")
}

fn pairs_eq(left_alias: &str, left: &[String], right_alias: &str, right: &[String]) -> Condition {
    combine(
        Combinator::And,
        left.iter()
            .zip(right)
            .map(|(l, r)| Condition::columns_eq(&path(left_alias, l), &path(right_alias, r))),
    )
}

fn intermediate_alias(table: &str, taken: &[&str]) -> String {
    let mut alias = table.to_string();
    while taken.contains(&alias.as_str()) {
        alias.push('2');
    }
    alias
}

/// Alias of a join table inside the correlation of one relation.
pub(crate) fn join_table_alias(relation: &str, join_table: &str, taken: &[&str]) -> String {
    intermediate_alias(&format!("{relation}_{join_table}"), taken)
}

/// Correlates `child_alias` (the related table) with `parent_alias` (the
/// owner).
#[must_use]
pub fn join_condition(
    schema: &Schema,
    relation: &Relation,
    parent_alias: &str,
    child_alias: &str,
) -> Condition {
    match &relation.kind {
        RelationKind::BelongsTo {
            foreign_keys,
            references,
        } => pairs_eq(child_alias, references, parent_alias, foreign_keys),
        RelationKind::HasOne {
            primary_keys,
            foreign_keys,
        }
        | RelationKind::HasMany {
            primary_keys,
            foreign_keys,
        } => pairs_eq(child_alias, foreign_keys, parent_alias, primary_keys),
        RelationKind::HasAndBelongsToMany {
            primary_keys,
            join_table,
            foreign_keys,
            association_foreign_keys,
            association_primary_keys,
        } => {
            let alias = join_table_alias(&relation.name, join_table, &[parent_alias, child_alias]);
            Condition::exists(
                schema
                    .query_on(join_table)
                    .with_alias(&alias)
                    .filter(pairs_eq(
                        &alias,
                        association_foreign_keys,
                        child_alias,
                        association_primary_keys,
                    ))
                    .filter(pairs_eq(&alias, foreign_keys, parent_alias, primary_keys)),
            )
        }
        RelationKind::Through { .. } => {
            let Some((through, source)) = relation.chain() else {
                return Condition::all();
            };
            let alias = intermediate_alias(&through.related, &[parent_alias, child_alias]);
            Condition::exists(
                schema
                    .query_on(&through.related)
                    .with_alias(&alias)
                    .filter(join_condition(schema, through, parent_alias, &alias))
                    .filter(join_condition(schema, source, &alias, child_alias))
                    .limit(1),
            )
        }
    }
}

fn key_values<'a>(
    record: &'a Record,
    table: &str,
    columns: &[String],
) -> Result<Vec<&'a SqlValue>> {
    columns
        .iter()
        .map(|c| {
            record.get(c).ok_or_else(|| OrmError::MissingKey {
                table: table.to_string(),
                column: c.clone(),
            })
        })
        .collect()
}

/// `alias.column = value` for every pair; `FALSE` if any value is NULL, as a
/// NULL key relates to nothing.
fn pairs_value(alias: &str, columns: &[String], values: &[&SqlValue]) -> Condition {
    if values.iter().any(|v| v.is_null()) {
        return Condition::in_list(&path(alias, &columns[0]), Vec::<SqlValue>::new());
    }
    combine(
        Combinator::And,
        columns
            .iter()
            .zip(values)
            .map(|(c, v)| Condition::eq(&path(alias, c), (*v).clone())),
    )
}

/// Selects the rows of `child_alias` related to one concrete parent record.
///
/// # Errors
///
/// Returns [`OrmError::MissingKey`] if the record lacks a key column.
pub fn method_condition(
    schema: &Schema,
    relation: &Relation,
    parent: &Record,
    child_alias: &str,
) -> Result<Condition> {
    let owner = relation.owner.as_str();
    Ok(match &relation.kind {
        RelationKind::BelongsTo {
            foreign_keys,
            references,
        } => pairs_value(child_alias, references, &key_values(parent, owner, foreign_keys)?),
        RelationKind::HasOne {
            primary_keys,
            foreign_keys,
        }
        | RelationKind::HasMany {
            primary_keys,
            foreign_keys,
        } => pairs_value(child_alias, foreign_keys, &key_values(parent, owner, primary_keys)?),
        RelationKind::HasAndBelongsToMany {
            primary_keys,
            join_table,
            foreign_keys,
            association_foreign_keys,
            association_primary_keys,
        } => {
            let values = key_values(parent, owner, primary_keys)?;
            let alias = join_table_alias(&relation.name, join_table, &[child_alias]);
            Condition::exists(
                schema
                    .query_on(join_table)
                    .with_alias(&alias)
                    .filter(pairs_eq(
                        &alias,
                        association_foreign_keys,
                        child_alias,
                        association_primary_keys,
                    ))
                    .filter(pairs_value(&alias, foreign_keys, &values)),
            )
        }
        RelationKind::Through { .. } => {
            let Some((through, source)) = relation.chain() else {
                return Ok(Condition::all());
            };
            let alias = intermediate_alias(&through.related, &[child_alias]);
            Condition::exists(
                schema
                    .query_on(&through.related)
                    .with_alias(&alias)
                    .filter(method_condition(schema, through, parent, &alias)?)
                    .filter(join_condition(schema, source, &alias, child_alias))
                    .limit(1),
            )
        }
    })
}

impl JoinResolver for Schema {
    fn resolve_join(
        &self,
        table: &str,
        relation: &str,
        parent_alias: &str,
    ) -> relq_core::Result<ResolvedJoin> {
        let unknown = || QueryError::UnknownRelation {
            table: table.to_string(),
            relation: relation.to_string(),
        };
        let rel = self.relation(table, relation).ok_or_else(unknown)?;
        let target = self.query_on(&rel.related).with_alias(&rel.name);
        let on = join_condition(self, rel, parent_alias, &rel.name);
        Ok(ResolvedJoin { target, on })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, JoinTableKeys, TableDef};
    use relq_core::{compile_with, JoinKind, Query};

    fn schema() -> Schema {
        let id = || ColumnDef::new("id").primary_key();
        Schema::builder()
            .table(TableDef::new("user").column(id()).column(ColumnDef::new("name")))
            .table(
                TableDef::new("message")
                    .column(id())
                    .column(ColumnDef::new("authorId"))
                    .column(ColumnDef::new("chatId"))
                    .column(ColumnDef::new("text")),
            )
            .table(TableDef::new("chat").column(id()).column(ColumnDef::new("title")))
            .has_many("user", "messages", "message", &["id"], &["authorId"])
            .belongs_to("message", "chat", "chat", &["chatId"], &["id"])
            .belongs_to("message", "author", "user", &["authorId"], &["id"])
            .through("user", "chats", "messages", "chat")
            .has_and_belongs_to_many(
                "user",
                "rooms",
                "chat",
                JoinTableKeys {
                    primary_keys: &["id"],
                    join_table: "chatUser",
                    foreign_keys: &["userId"],
                    association_foreign_keys: &["chatId"],
                    association_primary_keys: &["id"],
                },
            )
            .build()
            .unwrap()
    }

    fn related_sql(schema: &Schema, table: &str, name: &str, parent: &Record) -> String {
        let rel = schema.relation(table, name).unwrap();
        let target = schema.query_on(&rel.related).with_alias(name);
        let cond = method_condition(schema, rel, parent, name).unwrap();
        compile_with(&target.filter(cond), schema).unwrap().text
    }

    #[test]
    fn test_has_many_method_query() {
        let schema = schema();
        let user = Record::new().with("id", 1);
        assert_eq!(
            related_sql(&schema, "user", "messages", &user),
            "SELECT * FROM \"message\" AS \"messages\" WHERE \"messages\".\"authorId\" = $1"
        );
    }

    #[test]
    fn test_belongs_to_with_null_key_matches_nothing() {
        let schema = schema();
        let message = Record::new().with("chatId", SqlValue::Null);
        assert_eq!(
            related_sql(&schema, "message", "chat", &message),
            "SELECT * FROM \"chat\" WHERE FALSE"
        );
    }

    #[test]
    fn test_habtm_method_query_uses_join_table() {
        let schema = schema();
        let user = Record::new().with("id", 3);
        assert_eq!(
            related_sql(&schema, "user", "rooms", &user),
            "SELECT * FROM \"chat\" AS \"rooms\" WHERE EXISTS (SELECT 1 FROM \"chatUser\" \
             AS \"rooms_chatUser\" WHERE \"rooms_chatUser\".\"chatId\" = \"rooms\".\"id\" \
             AND \"rooms_chatUser\".\"userId\" = $1)"
        );
    }

    #[test]
    fn test_self_referencing_join_table_gets_own_alias() {
        let id = || ColumnDef::new("id").primary_key();
        let schema = Schema::builder()
            .table(TableDef::new("user").column(id()))
            .table(
                TableDef::new("friend")
                    .column(ColumnDef::new("userId"))
                    .column(ColumnDef::new("friendId")),
            )
            .has_and_belongs_to_many(
                "user",
                "friends",
                "user",
                JoinTableKeys {
                    primary_keys: &["id"],
                    join_table: "friend",
                    foreign_keys: &["userId"],
                    association_foreign_keys: &["friendId"],
                    association_primary_keys: &["id"],
                },
            )
            .build()
            .unwrap();
        let query = Query::table("user")
            .select_columns(&["id", "friends.id"])
            .join_named(JoinKind::Inner, "friends", None);
        assert_eq!(
            compile_with(&query, &schema).unwrap().text,
            "SELECT \"user\".\"id\", \"friends\".\"id\" FROM \"user\" JOIN \"user\" AS \"friends\" \
             ON EXISTS (SELECT 1 FROM \"friend\" AS \"friends_friend\" \
             WHERE \"friends_friend\".\"friendId\" = \"friends\".\"id\" \
             AND \"friends_friend\".\"userId\" = \"user\".\"id\")"
        );

        assert_eq!(
            join_table_alias("friends", "friend", &["friends_friend"]),
            "friends_friend2"
        );
    }

    #[test]
    fn test_through_join_nests_exists_on_intermediate() {
        let schema = schema();
        let query = Query::table("user")
            .select_columns(&["id", "chats.title"])
            .join_named(JoinKind::Inner, "chats", None);
        assert_eq!(
            compile_with(&query, &schema).unwrap().text,
            "SELECT \"user\".\"id\", \"chats\".\"title\" FROM \"user\" JOIN \"chat\" AS \"chats\" \
             ON EXISTS (SELECT 1 FROM \"message\" WHERE \"message\".\"authorId\" = \"user\".\"id\" \
             AND \"chats\".\"id\" = \"message\".\"chatId\" LIMIT 1)"
        );
    }

    #[test]
    fn test_unknown_relation_join_fails() {
        let schema = schema();
        let query = Query::table("user").join_named(JoinKind::Inner, "friends", None);
        assert_eq!(
            compile_with(&query, &schema).unwrap_err(),
            QueryError::UnknownRelation {
                table: "user".into(),
                relation: "friends".into()
            }
        );
    }

    #[test]
    fn test_returns_one_follows_chain() {
        let schema = schema();
        assert!(schema.relation("message", "author").unwrap().returns_one());
        assert!(!schema.relation("user", "chats").unwrap().returns_one());
    }
}
