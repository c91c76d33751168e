//! Database abstraction
//!
//! The engine talks to the relational store through a narrow handle: execute
//! a parameterized statement, or run a query and get rows back. Storage, the
//! monitor's connectivity probe, and the runner's script execution all share
//! this interface. A Postgres implementation over `sqlx` ships here; tests
//! use the in-memory implementation from [`crate::memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row as SqlxRow, TypeInfo};
use thiserror::Error;

/// A single result row: column name to JSON-typed value.
pub type Row = HashMap<String, Value>;

/// Error from the underlying driver.
#[derive(Debug, Clone, Error)]
#[error("database error: {0}")]
pub struct DbError(pub String);

/// Narrow database handle consumed by the engine.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Run a query and return all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;
}

/// Postgres-backed [`Database`] over a `sqlx` connection pool.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DbError(format!("failed to connect: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_params<'q>(
        mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        params: &'q [Value],
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        for param in params {
            query = match param {
                Value::Null => query.bind(Option::<String>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => query.bind(s.as_str()),
                other => query.bind(other.to_string()),
            };
        }
        query
    }

    fn convert_row(row: &PgRow) -> Result<Row, DbError> {
        let mut out = Row::with_capacity(row.columns().len());
        for (idx, column) in row.columns().iter().enumerate() {
            let value = match column.type_info().name() {
                "INT2" | "INT4" | "INT8" => row
                    .try_get::<Option<i64>, _>(idx)
                    .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
                "FLOAT4" | "FLOAT8" | "NUMERIC" => row
                    .try_get::<Option<f64>, _>(idx)
                    .map(|v| v.and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                        .unwrap_or(Value::Null)),
                "BOOL" => row
                    .try_get::<Option<bool>, _>(idx)
                    .map(|v| v.map(Value::Bool).unwrap_or(Value::Null)),
                "JSON" | "JSONB" => row
                    .try_get::<Option<Value>, _>(idx)
                    .map(|v| v.unwrap_or(Value::Null)),
                _ => row
                    .try_get::<Option<String>, _>(idx)
                    .map(|v| v.map(Value::String).unwrap_or(Value::Null)),
            }
            .map_err(|e| DbError(format!("failed to decode column '{}': {}", column.name(), e)))?;
            out.insert(column.name().to_string(), value);
        }
        Ok(out)
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| DbError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let query = Self::bind_params(sqlx::query(sql), params);
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbError(e.to_string()))?;
        rows.iter().map(Self::convert_row).collect()
    }
}

/// Read a string column out of a [`Row`].
pub(crate) fn row_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Read an integer column out of a [`Row`].
pub(crate) fn row_i64(row: &Row, key: &str) -> Option<i64> {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}
