//! The database boundary.
//!
//! Everything above this module speaks compiled `(text, params)` pairs. An
//! [`Adapter`] runs them on a pool and opens transactions; a
//! [`TransactionAdapter`] owns one connection for the duration of a
//! transaction.

pub mod postgres;

use async_trait::async_trait;
use relq_core::{quote_ident, SqlValue};

use crate::error::DatabaseError;
use crate::record::Record;

pub use postgres::PgAdapter;

/// Rows and affected row count of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Returned rows, keyed by output column name.
    pub rows: Vec<Record>,
    /// Rows returned or affected.
    pub row_count: u64,
}

impl QueryResult {
    /// Creates a result from rows; the row count is the number of rows.
    #[must_use]
    pub fn from_rows(rows: Vec<Record>) -> Self {
        Self {
            row_count: rows.len() as u64,
            rows,
        }
    }

    /// Creates a result without rows.
    #[must_use]
    pub const fn affected(row_count: u64) -> Self {
        Self {
            rows: Vec::new(),
            row_count,
        }
    }
}

/// Executes statements outside of a transaction and opens transactions.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Runs one statement.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError>;

    /// Reserves a connection and runs `begin_sql` (`BEGIN ...`) on it.
    async fn begin(&self, begin_sql: &str) -> Result<Box<dyn TransactionAdapter>, DatabaseError>;
}

/// One open transaction.
#[async_trait]
pub trait TransactionAdapter: Send {
    /// Runs one statement inside the transaction.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError>;

    /// `SAVEPOINT "name"`
    async fn savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        self.query(&format!("SAVEPOINT {}", quote_ident(name)), &[])
            .await
            .map(|_| ())
    }

    /// `RELEASE SAVEPOINT "name"`
    async fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        self.query(&format!("RELEASE SAVEPOINT {}", quote_ident(name)), &[])
            .await
            .map(|_| ())
    }

    /// `ROLLBACK TO SAVEPOINT "name"`
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        self.query(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)), &[])
            .await
            .map(|_| ())
    }

    /// Commits and gives the connection back.
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    /// Rolls back and gives the connection back.
    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}
