//! Query executor (C12, §4.8).
//!
//! Runs validated SQL against the live database: a smart count alongside a
//! bounded preview, both under their own timeouts. Results are handed back
//! to the caller for session caching under a fresh `query_id`.

use std::time::Duration;

use crate::constants::{DEFAULT_MAX_CACHE_ROWS, SMART_COUNT_CAP};
use crate::db::{ColumnInfo, DatabaseClient, Row, TotalCount};
use crate::error::Result;

pub struct ExecutionResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub total_count: TotalCount,
}

/// Executes `sql`, returning a bounded preview plus the smart count.
pub async fn execute(db: &dyn DatabaseClient, sql: &str, timeout: Duration) -> Result<ExecutionResult> {
    let total_count = db.count(sql, SMART_COUNT_CAP).await?;
    let preview = db.execute_preview(sql, DEFAULT_MAX_CACHE_ROWS, timeout).await?;

    Ok(ExecutionResult {
        columns: preview.columns,
        rows: preview.rows,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect;
    use std::str::FromStr;

    async fn seeded_db() -> (Box<dyn DatabaseClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec_test.db");
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let db = connect(&format!("sqlite://{}", path.display()), 5).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn execute_returns_columns_rows_and_count() {
        let (db, _dir) = seeded_db().await;
        let result = execute(db.as_ref(), "SELECT * FROM users ORDER BY id", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.total_count, TotalCount::Exact(2));
        db.close().await.unwrap();
    }
}
