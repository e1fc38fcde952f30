//! Postgres adapter over an sqlx pool.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use relq_core::SqlValue;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Postgres, Row, TypeInfo};

use super::{Adapter, QueryResult, TransactionAdapter};
use crate::config::DbConfig;
use crate::error::DatabaseError;
use crate::record::Record;

/// Runs statements on a [`PgPool`].
#[derive(Debug, Clone)]
pub struct PgAdapter {
    pool: PgPool,
}

impl PgAdapter {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool sized from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection cannot be established.
    pub async fn connect(url: &str, config: &DbConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Adapter for PgAdapter {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        let query = bind_params(sqlx::query(sql), params);
        if returns_rows(sql) {
            let rows = query.fetch_all(&self.pool).await?;
            decode_rows(&rows)
        } else {
            let done = query.execute(&self.pool).await?;
            Ok(QueryResult::affected(done.rows_affected()))
        }
    }

    async fn begin(&self, begin_sql: &str) -> Result<Box<dyn TransactionAdapter>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(begin_sql).execute(&mut *conn).await?;
        Ok(Box::new(PgTransaction { conn: Some(conn) }))
    }
}

/// A connection held for one transaction.
struct PgTransaction {
    conn: Option<PoolConnection<Postgres>>,
}

impl PgTransaction {
    fn conn(&mut self) -> Result<&mut PoolConnection<Postgres>, DatabaseError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DatabaseError::Other(String::from("transaction already finished")))
    }

    async fn finish(mut self: Box<Self>, sql: &str) -> Result<(), DatabaseError> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| DatabaseError::Other(String::from("transaction already finished")))?;
        sqlx::query(sql).execute(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionAdapter for PgTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        let conn = self.conn()?;
        let query = bind_params(sqlx::query(sql), params);
        if returns_rows(sql) {
            let rows = query.fetch_all(&mut **conn).await?;
            decode_rows(&rows)
        } else {
            let done = query.execute(&mut **conn).await?;
            Ok(QueryResult::affected(done.rows_affected()))
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // Never hand a connection with an open transaction back to the pool.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// Statements whose result rows are fetched rather than counted.
fn returns_rows(sql: &str) -> bool {
    let head = sql.trim_start();
    let starts = |keyword: &str| {
        head.get(..keyword.len())
            .is_some_and(|h| h.eq_ignore_ascii_case(keyword))
    };
    starts("SELECT") || starts("WITH") || sql.contains(" RETURNING ")
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value.clone() {
            // Written NULLs are inlined by the compiler; this covers raw
            // statements only.
            SqlValue::Null => query.bind(Option::<i64>::None),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Float(f) => query.bind(f),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Blob(b) => query.bind(b),
            SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
            SqlValue::Timestamp(t) => query.bind(t),
            SqlValue::Uuid(u) => query.bind(u),
        };
    }
    query
}

fn decode_rows(rows: &[PgRow]) -> Result<QueryResult, DatabaseError> {
    let records = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
    Ok(QueryResult::from_rows(records))
}

fn decode_row(row: &PgRow) -> Result<Record, DatabaseError> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, i, column.type_info().name())
            .map_err(|e| DatabaseError::Decode(format!("column `{}`: {e}", column.name())))?;
        record.insert_raw(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_value(row: &PgRow, i: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(SqlValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(i)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT4" => row
            .try_get::<Option<i32>, _>(i)?
            .map(|v| SqlValue::Int(i64::from(v))),
        "INT8" => row.try_get::<Option<i64>, _>(i)?.map(SqlValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)?
            .map(|v| SqlValue::Float(f64::from(v))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(SqlValue::Float),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(i)?
            .map(|v| SqlValue::Text(v.to_string())),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i)?.map(SqlValue::Blob),
        "UUID" => row.try_get::<Option<Uuid>, _>(i)?.map(SqlValue::Uuid),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(i)?
            .map(SqlValue::Json),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(i)?
            .map(|v| SqlValue::Timestamp(v.and_utc())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(i)?
            .map(|v| SqlValue::Text(v.to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(i)?
            .map(|v| SqlValue::Text(v.to_string())),
        "INTERVAL" => row.try_get::<Option<PgInterval>, _>(i)?.map(|v| {
            SqlValue::Json(serde_json::json!({
                "months": v.months,
                "days": v.days,
                "microseconds": v.microseconds,
            }))
        }),
        "TEXT[]" | "VARCHAR[]" => json_array::<String>(row, i)?,
        "INT2[]" => json_array::<i16>(row, i)?,
        "INT4[]" => json_array::<i32>(row, i)?,
        "INT8[]" => json_array::<i64>(row, i)?,
        "FLOAT8[]" => json_array::<f64>(row, i)?,
        "BOOL[]" => json_array::<bool>(row, i)?,
        "UUID[]" => json_array::<Uuid>(row, i)?,
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(i)?.map(SqlValue::Text)
        }
        // Enums and other text-like types send their label; anything else
        // is kept as raw bytes.
        _ => match row.try_get_unchecked::<Option<String>, _>(i) {
            Ok(text) => text.map(SqlValue::Text),
            Err(_) => row
                .try_get_unchecked::<Option<Vec<u8>>, _>(i)?
                .map(SqlValue::Blob),
        },
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// An array column as a JSON array.
fn json_array<T>(row: &PgRow, i: usize) -> Result<Option<SqlValue>, sqlx::Error>
where
    T: serde::Serialize,
    Vec<T>: sqlx::Type<Postgres> + for<'r> sqlx::Decode<'r, Postgres>,
{
    row.try_get::<Option<Vec<T>>, _>(i)?
        .map(|items| {
            serde_json::to_value(items)
                .map(SqlValue::Json)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .transpose()
}
