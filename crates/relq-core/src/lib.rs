//! # relq-core
//!
//! Query descriptors, condition trees and the Postgres SQL compiler.
//!
//! This crate performs no I/O. It provides:
//! - A condition model (`Compare`, `And`, `Or`, `Not`, `In`, `Exists`, `Raw`)
//!   that flattens nested junctions and collapses double negation
//! - A clone-on-write [`Query`] descriptor with joins, grouping, paging,
//!   `WITH` entries and one optional write intent
//! - A deterministic compiler producing `$n`-parameterized SQL, with
//!   placeholder numbering shared by every nested sub-query
//!
//! ## Building and compiling
//!
//! ```rust
//! use relq_core::{Condition, JoinKind, Query, SelectItem};
//!
//! let query = Query::table("user")
//!     .with_alias("u")
//!     .select([SelectItem::column("id"), SelectItem::column("m.text")])
//!     .join(
//!         JoinKind::Inner,
//!         Query::table("message").with_alias("m"),
//!         Condition::columns_eq("m.authorId", "u.id"),
//!     )
//!     .filter(Condition::eq("name", "Ann"));
//!
//! let sql = query.compile().unwrap();
//! assert_eq!(
//!     sql.text,
//!     "SELECT \"u\".\"id\", \"m\".\"text\" FROM \"user\" AS \"u\" \
//!      JOIN \"message\" AS \"m\" ON \"m\".\"authorId\" = \"u\".\"id\" \
//!      WHERE \"u\".\"name\" = $1"
//! );
//! ```
//!
//! ## SQL Injection Prevention
//!
//! Values never reach the statement text; they are collected into
//! [`Sql::params`] and referenced by position.

pub mod aggregate;
pub mod compiler;
pub mod condition;
pub mod error;
pub mod expr;
pub mod query;
pub mod value;

pub use aggregate::{Aggregate, AggregateFn};
pub use compiler::{compile, compile_with, quote_ident, JoinResolver, ResolvedJoin, Sql};
pub use condition::{combine, Combinator, CompareOp, Condition, InSource};
pub use error::{QueryError, Result};
pub use expr::{col, raw, val, ColumnRef, Expr, IntoExpr, RawSql};
pub use query::{
    AssignValue, Assignment, ColumnShape, ConflictAction, InsertData, InsertRows, InsertSource,
    InsertValue, Intent, Join, JoinKind, JoinTarget, Nulls, OnConflict, OrderBy, OrderDirection,
    Query, ReturnShape, SelectItem, WithItem,
};
pub use value::{SqlValue, ToSqlValue};
