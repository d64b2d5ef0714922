//! Mock database client for pipeline tests that don't need a real SQLite file.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::stream::BoxStream;

use super::{ColumnInfo, DatabaseClient, Dialect, Introspection, QueryResult, Row, TotalCount, Value};
use crate::error::Result;

/// Returns a single `{result: "Mock result for: <sql>"}` row for any `SELECT`
/// and an empty result otherwise. Deterministic, no I/O — useful wherever a
/// test needs a `DatabaseClient` but not the behavior of a real adapter.
pub struct MockDatabaseClient {
    introspection: Introspection,
}

impl MockDatabaseClient {
    pub fn new() -> Self {
        Self {
            introspection: Introspection::default(),
        }
    }

    /// Pre-seeds the introspection snapshot the drift check sees.
    pub fn with_tables(tables: HashMap<String, HashSet<String>>) -> Self {
        Self {
            introspection: Introspection { tables },
        }
    }

    fn mock_result(sql: &str) -> QueryResult {
        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            QueryResult::with_data(
                vec![ColumnInfo::new("result", "text")],
                vec![vec![Value::String(format!("Mock result for: {sql}"))]],
            )
        } else {
            QueryResult::new()
        }
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn introspect(&self) -> Result<Introspection> {
        Ok(self.introspection.clone())
    }

    async fn count(&self, sql: &str, _cap: i64) -> Result<TotalCount> {
        Ok(TotalCount::Exact(Self::mock_result(sql).rows.len()))
    }

    async fn execute_preview(&self, sql: &str, _limit: usize, _timeout: Duration) -> Result<QueryResult> {
        Ok(Self::mock_result(sql))
    }

    async fn execute_stream(
        &self,
        sql: &str,
        _chunk_timeout: Duration,
    ) -> Result<(Vec<ColumnInfo>, BoxStream<'static, Result<Row>>)> {
        let result = Self::mock_result(sql);
        let rows: Vec<Result<Row>> = result.rows.into_iter().map(Ok).collect();
        Ok((result.columns, Box::pin(stream::iter(rows))))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn select_returns_one_mock_row() {
        let client = MockDatabaseClient::new();
        let result = client.execute_preview("SELECT 1", 10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn non_select_returns_empty_result() {
        let client = MockDatabaseClient::new();
        let result = client
            .execute_preview("INSERT INTO test VALUES (1)", 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.row_count, 0);
    }

    #[tokio::test]
    async fn with_tables_is_returned_verbatim_by_introspect() {
        let mut tables = HashMap::new();
        tables.insert("users".to_string(), HashSet::from(["id".to_string()]));
        let client = MockDatabaseClient::with_tables(tables);
        let introspection = client.introspect().await.unwrap();
        assert!(introspection.tables.contains_key("users"));
    }
}
