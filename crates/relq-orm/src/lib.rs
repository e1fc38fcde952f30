//! # relq-orm
//!
//! A relation-aware ORM for Postgres built on `relq-core`.
//!
//! This crate provides:
//! - `Schema` with table definitions, per-column codecs, hooks and
//!   relations (`belongsTo`, `hasOne`, `hasMany`, `hasAndBelongsToMany`,
//!   `through`) validated when the schema is built
//! - `TableQuery` for chainable reads, eager loading of relations and
//!   relation accessors
//! - Nested create and update: one call writes related rows in dependency
//!   order, one statement per relation and batch
//! - Transactions that nest through savepoints, with after-commit hooks
//!
//! ## Quick Start
//!
//! ```ignore
//! use relq_core::Condition;
//! use relq_orm::{ColumnDef, CreateData, Db, DbConfig, NestedCreate, Schema, TableDef};
//!
//! let schema = Schema::builder()
//!     .table(TableDef::new("user").column(ColumnDef::new("id").primary_key()).column(ColumnDef::new("name")))
//!     .table(
//!         TableDef::new("message")
//!             .column(ColumnDef::new("id").primary_key())
//!             .column(ColumnDef::new("authorId"))
//!             .column(ColumnDef::new("text")),
//!     )
//!     .has_many("user", "messages", "message", &["id"], &["authorId"])
//!     .build()?;
//!
//! let db = Db::connect("postgres://localhost/app", schema, DbConfig::from_env()).await?;
//!
//! // One INSERT for the user, one for both messages, in one transaction.
//! let user = db
//!     .table("user")?
//!     .create(
//!         CreateData::new().set("name", "Ann").with_relation(
//!             "messages",
//!             NestedCreate::new().create_many([
//!                 CreateData::new().set("text", "a"),
//!                 CreateData::new().set("text", "b"),
//!             ]),
//!         ),
//!     )
//!     .await?;
//!
//! let texts = db
//!     .table("user")?
//!     .related("messages", &user)?
//!     .pluck("text")
//!     .await?;
//! ```
//!
//! ## Transactions
//!
//! ```ignore
//! db.transaction(|| async {
//!     db.table("user")?.create(CreateData::new().set("name", "X")).await?;
//!     // Rolled back on its own; the outer transaction continues.
//!     let _ = db
//!         .transaction(|| async { Err::<(), _>(relq_orm::OrmError::UnknownTable("y".into())) })
//!         .await;
//!     Ok::<_, relq_orm::OrmError>(())
//! })
//! .await?;
//! ```

pub mod adapter;
pub mod config;
pub mod db;
pub mod error;
pub mod nested;
pub mod record;
pub mod relations;
pub mod schema;
pub mod table_query;
pub mod transaction;

pub use adapter::{Adapter, PgAdapter, QueryResult, TransactionAdapter};
pub use config::DbConfig;
pub use db::Db;
pub use error::{AfterCommitError, BoxError, DatabaseError, HookFailure, OrmError, Result};
pub use nested::{
    ConnectOrCreate, CreateData, NestedCreate, NestedUpdate, ToManyUpdate, ToOneUpdate, UpdateData,
    Upsert,
};
pub use record::{Record, Related};
pub use relations::{join_condition, method_condition, Relation, RelationKind};
pub use schema::{
    AfterWriteHook, BeforeCreateHook, Codec, ColumnDef, JoinTableKeys, Schema, SchemaBuilder,
    TableDef,
};
pub use table_query::TableQuery;
pub use transaction::{IsolationLevel, TransactionOptions};
