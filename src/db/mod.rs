//! Database abstraction layer (C2).
//!
//! A trait-based interface over SQLite and PostgreSQL, giving the rest of the
//! pipeline read-only access (smart count, bounded preview, unbounded stream)
//! plus a one-shot introspection used only by the startup drift check.

#[cfg(test)]
pub mod mock;
mod postgres;
mod sqlite;
mod types;

pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;
pub use types::{ColumnInfo, QueryResult, Row, TotalCount, Value};

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};

/// SQL dialect spoken by the live database; drives generator prompt rules
/// and is reported verbatim in `GET /api/schema/overview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// A shallow structural snapshot of the live database: table names and, per
/// table, the set of column names. Used once at bootstrap for the one-way
/// schema drift check (§4.12) — nothing else needs this shape.
#[derive(Debug, Clone, Default)]
pub struct Introspection {
    pub tables: HashMap<String, HashSet<String>>,
}

/// Creates a database client for the given URL (`sqlite://...` or `postgres://...`).
pub async fn connect(database_url: &str, pool_size: u32) -> Result<Box<dyn DatabaseClient>> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        let client = SqliteClient::connect(path, pool_size).await?;
        Ok(Box::new(client))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let client = PostgresClient::connect(database_url, pool_size).await?;
        Ok(Box::new(client))
    } else {
        Err(crate::error::AppError::config(format!(
            "unsupported database URL scheme: {database_url}"
        )))
    }
}

/// Trait defining read-only access to a relational database.
///
/// All operations are SELECT-only by construction: the validator (C7) rejects
/// anything else before SQL reaches this layer, and adapters open connections
/// as read-only where the driver supports it.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// One-shot structural snapshot used by the startup drift check.
    async fn introspect(&self) -> Result<Introspection>;

    /// Smart count (§4.2): exact up to `cap`, `Unknown` above it.
    async fn count(&self, sql: &str, cap: i64) -> Result<TotalCount>;

    /// Runs `sql` wrapped in an outer `LIMIT limit`, with a bounded wall-clock timeout.
    async fn execute_preview(&self, sql: &str, limit: usize, timeout: std::time::Duration) -> Result<QueryResult>;

    /// Runs `sql` unbounded, returning columns up front and a lazy row stream
    /// for CSV download. Each chunk read is subject to `chunk_timeout`.
    async fn execute_stream(
        &self,
        sql: &str,
        chunk_timeout: std::time::Duration,
    ) -> Result<(Vec<ColumnInfo>, BoxStream<'static, Result<Row>>)>;

    async fn close(&self) -> Result<()>;
}

/// Wraps `sql` in an outer `SELECT * FROM (...) LIMIT n` unless it is already
/// limited. Used by both adapters' `execute_preview`.
pub(crate) fn wrap_with_limit(sql: &str, limit: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    format!("SELECT * FROM ({trimmed}) AS _nlsql_preview LIMIT {limit}")
}

/// Wraps `sql` for a smart count: `SELECT COUNT(*) FROM (SELECT 1 FROM (...) LIMIT cap+1)`.
pub(crate) fn wrap_with_count_cap(sql: &str, cap: i64) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM ({trimmed}) AS _nlsql_count_inner LIMIT {}) AS _nlsql_count_outer",
        cap + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_with_limit_strips_trailing_semicolon() {
        let wrapped = wrap_with_limit("SELECT * FROM users;", 10);
        assert!(wrapped.contains("LIMIT 10"));
        assert!(!wrapped.contains(";)"));
    }

    #[test]
    fn wrap_with_count_cap_uses_cap_plus_one() {
        let wrapped = wrap_with_count_cap("SELECT * FROM users", 1000);
        assert!(wrapped.contains("LIMIT 1001"));
    }
}
