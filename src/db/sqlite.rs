//! SQLite database client implementation.
//!
//! Mirrors [`super::postgres::PostgresClient`]'s shape; SQLite has no
//! information_schema, so introspection goes through `sqlite_master` and
//! `PRAGMA table_info`.

use crate::db::{
    wrap_with_count_cap, wrap_with_limit, ColumnInfo, DatabaseClient, Dialect, Introspection,
    QueryResult, Row, TotalCount, Value,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as SqlxColumn, Row as SqlxRow, TypeInfo};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// SQLite database client. Opened read-only: the pipeline only ever issues
/// SELECT statements, and the validator (C7) rejects anything else upstream.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    #[allow(dead_code)]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(path: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| AppError::db_conn(format!("invalid sqlite path '{path}': {e}")))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| AppError::db_conn(format!("failed to open sqlite database '{path}': {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn introspect(&self) -> Result<Introspection> {
        let table_names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::db_conn(format!("failed to list tables: {e}")))?;

        let mut tables: HashMap<String, HashSet<String>> = HashMap::new();
        for table_name in table_names {
            let columns: Vec<(String,)> =
                sqlx::query_as(&format!("PRAGMA table_info({table_name})"))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| {
                        AppError::db_conn(format!("failed to introspect table {table_name}: {e}"))
                    })?
                    .into_iter()
                    .map(|row: SqliteRow| (row.get::<String, _>("name"),))
                    .collect();
            tables.insert(table_name, columns.into_iter().map(|(c,)| c).collect());
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
        let columns = rows.first().map(columns_of).unwrap_or_default();
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

fn columns_of(row: &SqliteRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

fn convert_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INTEGER" | "INT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BLOB" => row
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

/// Classifies a query execution error per the §7 taxonomy.
fn map_query_error(error: sqlx::Error) -> AppError {
    if let Some(db_error) = error.as_database_error() {
        let message = db_error.message().to_lowercase();
        if message.contains("syntax error") || message.contains("no such table") || message.contains("no such column")
        {
            return AppError::db_syntax(db_error.message().to_string());
        }
        if message.contains("permission") || message.contains("readonly") || message.contains("read-only") {
            return AppError::db_permission(db_error.message().to_string());
        }
    }
    AppError::db_conn(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::tempdir;

    async fn seeded_client() -> (SqliteClient, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let client = SqliteClient::connect(&format!("{}", path.display()), 5)
            .await
            .unwrap();
        (client, dir)
    }

    #[tokio::test]
    async fn introspect_lists_tables_and_columns() {
        let (client, _dir) = seeded_client().await;
        let introspection = client.introspect().await.unwrap();
        let columns = introspection.tables.get("users").expect("users table");
        assert!(columns.contains("id"));
        assert!(columns.contains("name"));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn execute_preview_returns_rows_within_limit() {
        let (client, _dir) = seeded_client().await;
        let result = client
            .execute_preview("SELECT * FROM users ORDER BY id", 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn count_reports_exact_below_cap() {
        let (client, _dir) = seeded_client().await;
        let count = client.count("SELECT * FROM users", 1000).await.unwrap();
        assert_eq!(count, TotalCount::Exact(2));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn execute_stream_yields_all_rows() {
        let (client, _dir) = seeded_client().await;
        let (columns, mut stream) = client
            .execute_stream("SELECT * FROM users ORDER BY id", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(columns.len(), 2);
        let mut count = 0;
        while let Some(row) = stream.next().await {
            row.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn preview_and_stream_agree_on_row_order() {
        let (client, _dir) = seeded_client().await;
        let preview = client
            .execute_preview("SELECT * FROM users ORDER BY id", 10, Duration::from_secs(5))
            .await
            .unwrap();

        let (_, mut stream) = client
            .execute_stream("SELECT * FROM users ORDER BY id", Duration::from_secs(5))
            .await
            .unwrap();
        let mut streamed_rows = Vec::new();
        while let Some(row) = stream.next().await {
            streamed_rows.push(row.unwrap());
        }

        assert_eq!(preview.rows, streamed_rows);
        client.close().await.unwrap();
    }
}
