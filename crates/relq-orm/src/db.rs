//! The database handle.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use relq_core::{Sql, SqlValue};
use tracing::{debug, warn};

use crate::adapter::{Adapter, PgAdapter, QueryResult, TransactionAdapter};
use crate::config::DbConfig;
use crate::error::{DatabaseError, OrmError, Result};
use crate::schema::Schema;
use crate::table_query::TableQuery;
use crate::transaction;

static NEXT_DB_ID: AtomicU64 = AtomicU64::new(1);

/// Entry point: an adapter, a schema and configuration.
///
/// Cloning is cheap; clones share the adapter and take part in the same
/// transactions.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    id: u64,
    adapter: Arc<dyn Adapter>,
    schema: Arc<Schema>,
    config: DbConfig,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Creates a handle over any adapter.
    pub fn new(adapter: Arc<dyn Adapter>, schema: Schema, config: DbConfig) -> Self {
        Self {
            inner: Arc::new(DbInner {
                id: NEXT_DB_ID.fetch_add(1, Ordering::Relaxed),
                adapter,
                schema: Arc::new(schema),
                config,
            }),
        }
    }

    /// Opens a Postgres pool.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Connect`] if the pool cannot be opened.
    pub async fn connect(url: &str, schema: Schema, config: DbConfig) -> Result<Self> {
        let adapter = PgAdapter::connect(url, &config)
            .await
            .map_err(OrmError::Connect)?;
        Ok(Self::new(Arc::new(adapter), schema, config))
    }

    /// The schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Starts a query on a table.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnknownTable`].
    pub fn table(&self, name: &str) -> Result<TableQuery> {
        let table = Arc::clone(self.inner.schema.table(name)?);
        Ok(TableQuery::new(self.clone(), table))
    }

    /// Runs a compiled statement, inside the current transaction if there is
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Database`] tagged with the statement.
    pub async fn query(&self, sql: &Sql) -> Result<QueryResult> {
        if let Some(state) = transaction::current(self.inner.id) {
            let mut guard = state.conn.lock().await;
            let conn = guard
                .as_mut()
                .ok_or_else(|| finished(&sql.text, &sql.params))?;
            return self
                .traced(&sql.text, &sql.params, state.log, conn.query(&sql.text, &sql.params))
                .await;
        }
        self.traced(
            &sql.text,
            &sql.params,
            None,
            self.inner.adapter.query(&sql.text, &sql.params),
        )
        .await
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    /// Awaits an adapter call, logging it as `text`.
    pub(crate) async fn traced<T: Outcome>(
        &self,
        text: &str,
        params: &[SqlValue],
        log: Option<bool>,
        call: impl Future<Output = std::result::Result<T, DatabaseError>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = call.await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok(value) => {
                if log.unwrap_or(self.inner.config.log_queries) {
                    debug!(
                        target: "relq::query",
                        sql = %text,
                        params = params.len(),
                        elapsed_ms,
                        rows = value.rows(),
                        "query"
                    );
                }
                if let Some(threshold_ms) = self.inner.config.slow_query_ms {
                    if elapsed_ms >= threshold_ms {
                        warn!(target: "relq::query", sql = %text, elapsed_ms, threshold_ms, "Slow query");
                    }
                }
                Ok(value)
            }
            Err(source) => {
                debug!(target: "relq::query", sql = %text, elapsed_ms, error = %source, "Query failed");
                Err(OrmError::Database {
                    sql: text.to_string(),
                    params: params.to_vec(),
                    source,
                })
            }
        }
    }
}

/// Something an adapter call produced, as seen by the query log.
pub(crate) trait Outcome {
    fn rows(&self) -> u64;
}

impl Outcome for QueryResult {
    fn rows(&self) -> u64 {
        self.row_count
    }
}

impl Outcome for () {
    fn rows(&self) -> u64 {
        0
    }
}

impl Outcome for Box<dyn TransactionAdapter> {
    fn rows(&self) -> u64 {
        0
    }
}

pub(crate) fn finished(text: &str, params: &[SqlValue]) -> OrmError {
    OrmError::Database {
        sql: text.to_string(),
        params: params.to_vec(),
        source: DatabaseError::Other(String::from("transaction is no longer active")),
    }
}
