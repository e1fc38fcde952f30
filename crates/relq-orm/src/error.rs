//! Error types for the ORM.

use std::any::Any;
use std::fmt;

use relq_core::{QueryError, SqlValue};
use thiserror::Error;

/// Boxed error returned by column codecs and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a database adapter.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Error from sqlx.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A returned value could not be converted into a [`SqlValue`].
    #[error("cannot decode value: {0}")]
    Decode(String),

    /// Any other adapter failure.
    #[error("{0}")]
    Other(String),
}

/// ORM errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// The query could not be built or compiled.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A table name that is not part of the schema.
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// A chain of through relations that leads back to itself.
    #[error("cyclic through relation: {path}")]
    CyclicRelation {
        /// Relations visited, as `table.relation` joined by ` -> `.
        path: String,
    },

    /// A relation declaration that cannot be resolved.
    #[error("invalid relation `{relation}` on `{table}`: {reason}")]
    InvalidRelation {
        /// Owner table.
        table: String,
        /// Relation name.
        relation: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No row matched where exactly one was expected.
    #[error("no `{table}` record found")]
    NotFound {
        /// Table that was queried.
        table: String,
    },

    /// Several rows matched where at most one was expected.
    #[error("expected at most one `{table}` record, found {count}")]
    MoreThanOneRow {
        /// Table that was queried.
        table: String,
        /// Number of rows returned.
        count: usize,
    },

    /// The connection pool could not be opened.
    #[error("cannot connect: {0}")]
    Connect(#[source] DatabaseError),

    /// A statement failed in the adapter.
    #[error("query failed: {source}\n  sql: {sql}")]
    Database {
        /// Statement text.
        sql: String,
        /// Bound parameters.
        params: Vec<SqlValue>,
        /// Adapter failure.
        #[source]
        source: DatabaseError,
    },

    /// A column encoder or decoder failed.
    #[error("cannot convert `{table}.{column}`: {source}")]
    Codec {
        /// Table of the column.
        table: String,
        /// Column key.
        column: String,
        /// Codec failure.
        #[source]
        source: BoxError,
    },

    /// A table hook failed.
    #[error("{hook} hook of `{table}` failed: {source}")]
    Hook {
        /// Table the hook is registered on.
        table: String,
        /// Hook kind.
        hook: &'static str,
        /// Hook failure.
        #[source]
        source: BoxError,
    },

    /// A record lacks a key column needed to follow a relation.
    #[error("`{table}` record has no value for key column `{column}`")]
    MissingKey {
        /// Table of the record.
        table: String,
        /// Missing column key.
        column: String,
    },

    /// A key lookup that does not match the table's primary key.
    #[error("cannot look up `{table}` by key: {reason}")]
    InvalidKey {
        /// Target table.
        table: String,
        /// What does not match.
        reason: String,
    },

    /// More than one record created through a many-to-many relation while
    /// creating several parents at once.
    #[error(
        "creating several `{relation}` records per `{table}` record is not supported in a batch create"
    )]
    UnsupportedBatchJoinCreate {
        /// Parent table.
        table: String,
        /// Many-to-many relation.
        relation: String,
    },

    /// A nested write that the relation kind does not support.
    #[error("invalid nested write on `{table}.{relation}`: {reason}")]
    InvalidNestedWrite {
        /// Parent table.
        table: String,
        /// Relation name.
        relation: String,
        /// Why it is rejected.
        reason: String,
    },

    /// An update or delete without conditions that was not marked with
    /// `all_rows()`.
    #[error("{operation} on `{table}` has no conditions; call all_rows() to affect every row")]
    UnscopedWrite {
        /// Target table.
        table: String,
        /// `update` or `delete`.
        operation: &'static str,
    },

    /// The transaction committed but after-commit hooks failed.
    #[error(transparent)]
    AfterCommit(AfterCommitError),
}

/// One failed after-commit hook.
#[derive(Debug)]
pub struct HookFailure {
    /// Name given when the hook was registered.
    pub name: String,
    /// The failure.
    pub error: BoxError,
}

/// Every after-commit hook failure of one transaction, together with the
/// value the committed transaction produced.
pub struct AfterCommitError {
    /// Failed hooks, in registration order.
    pub failures: Vec<HookFailure>,
    /// Result of the transaction callback.
    pub committed: Box<dyn Any + Send + Sync>,
}

impl AfterCommitError {
    /// Recovers the committed value.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the value is not a `T`.
    pub fn into_committed<T: 'static>(self) -> std::result::Result<T, Self> {
        match self.committed.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(committed) => Err(Self {
                failures: self.failures,
                committed,
            }),
        }
    }
}

impl fmt::Debug for AfterCommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AfterCommitError")
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AfterCommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction committed but after-commit hooks failed:\n{}",
            self.failures
                .iter()
                .map(|h| format!("  - {}: {}", h.name, h.error))
                .collect::<Vec<_>>()
                .join("\n")
        )
    }
}

impl std::error::Error for AfterCommitError {}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_commit_error_lists_every_hook() {
        let err = AfterCommitError {
            failures: vec![
                HookFailure {
                    name: "mail".into(),
                    error: "smtp down".into(),
                },
                HookFailure {
                    name: "index".into(),
                    error: "timeout".into(),
                },
            ],
            committed: Box::new(5_i64),
        };
        let text = err.to_string();
        assert!(text.contains("  - mail: smtp down"));
        assert!(text.contains("  - index: timeout"));
        assert_eq!(err.into_committed::<i64>().unwrap(), 5);
    }

    #[test]
    fn test_query_error_is_transparent() {
        let err: OrmError = QueryError::EmptyWriteSet {
            table: "user".into(),
        }
        .into();
        assert_eq!(err.to_string(), "update on `user` has nothing to set");
    }
}
