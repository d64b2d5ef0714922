//! PostgreSQL database client implementation.

use crate::db::{
    wrap_with_count_cap, wrap_with_limit, ColumnInfo, DatabaseClient, Dialect, Introspection,
    QueryResult, Row, TotalCount, Value,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    #[allow(dead_code)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(pool_size)
                .acquire_timeout(Duration::from_secs(10))
                .connect(database_url)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to database");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(map_connection_error(last_error.expect("at least one attempt was made")))
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn introspect(&self) -> Result<Introspection> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT table_name::text, column_name::text
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::db_conn(format!("failed to introspect schema: {e}")))?;

        let mut tables: HashMap<String, HashSet<String>> = HashMap::new();
        for (table, column) in rows {
            tables.entry(table).or_default().insert(column);
        }
        Ok(Introspection { tables })
    }

    async fn count(&self, sql: &str, cap: i64) -> Result<TotalCount> {
        let wrapped = wrap_with_count_cap(sql, cap);
        let count: i64 = sqlx::query_scalar(&wrapped)
            .fetch_one(&self.pool)
            .await
            .map_err(map_query_error)?;

        if count > cap {
            Ok(TotalCount::Unknown)
        } else {
            Ok(TotalCount::Exact(count as usize))
        }
    }

    async fn execute_preview(&self, sql: &str, limit: usize, timeout: Duration) -> Result<QueryResult> {
        let wrapped = wrap_with_limit(sql, limit);
        let start = Instant::now();

        let rows = tokio::time::timeout(timeout, sqlx::query(&wrapped).fetch_all(&self.pool))
            .await
            .map_err(|_| AppError::db_timeout(format!("query timed out after {timeout:?}")))?
            .map_err(map_query_error)?;

        let execution_time = start.elapsed();
        let columns = rows
            .first()
            .map(columns_of)
            .unwrap_or_default();
        let row_count = rows.len();
        let converted: Vec<Row> = rows.iter().map(convert_row).collect();

        Ok(QueryResult {
            columns,
            rows: converted,
            execution_time,
            row_count,
            total_rows: Some(row_count),
            was_truncated: false,
        })
    }

    async fn execute_stream(
        &self,
        sql: &str,
        chunk_timeout: Duration,
    ) -> Result<(Vec<ColumnInfo>, BoxStream<'static, Result<Row>>)> {
        let head = tokio::time::timeout(chunk_timeout, sqlx::query(sql).fetch_optional(&self.pool))
            .await
            .map_err(|_| AppError::db_timeout(format!("query timed out after {chunk_timeout:?}")))?
            .map_err(map_query_error)?;

        let columns = head.as_ref().map(columns_of).unwrap_or_default();

        let pool = self.pool.clone();
        let sql = sql.to_string();
        let stream = async_stream::try_stream! {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            if let Some(row) = head {
                yield convert_row(&row);
            }
            while let Some(row) = rows.next().await {
                let row = row.map_err(map_query_error)?;
                yield convert_row(&row);
            }
        };

        Ok((columns, Box::pin(stream)))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn columns_of(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();
    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

fn map_connection_error(error: sqlx::Error) -> AppError {
    let error_str = error.to_string().to_lowercase();
    if error_str.contains("password authentication failed") || error_str.contains("authentication failed") {
        AppError::db_permission(format!("authentication failed: {error}"))
    } else {
        AppError::db_conn(error.to_string())
    }
}

/// Classifies a query execution error per the §7 taxonomy.
fn map_query_error(error: sqlx::Error) -> AppError {
    if let Some(db_error) = error.as_database_error() {
        let code = db_error.code().map(|c| c.to_string()).unwrap_or_default();
        // Postgres class 42 = syntax error or access rule violation.
        if code.starts_with("42") {
            return AppError::db_syntax(format_query_error(db_error));
        }
        if code == "42501" {
            return AppError::db_permission(format_query_error(db_error));
        }
    }
    AppError::db_conn(error.to_string())
}

fn format_query_error(db_error: &(dyn sqlx::error::DatabaseError + 'static)) -> String {
    let mut result = format!("ERROR: {}", db_error.message());
    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }
    result
}
