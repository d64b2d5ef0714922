//! Persistent SQL cache (C4).
//!
//! `normalized_query -> { generated_sql, created_at, hit_count, last_used_at }`,
//! backed by a single SQLite file opened through [`crate::persistence::open_pool`].
//! On conflict, `hit_count` increments only when the incoming SQL equals the
//! stored SQL; a genuinely new SQL string overwrites instead of merging.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct SqlCache {
    pool: SqlitePool,
}

/// A cache hit: the stored SQL plus how many times this query has been asked.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub sql: String,
    pub hit_count: i64,
}

impl SqlCache {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::persistence::open_pool(path).await?;
        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sql_cache (
                normalized_query TEXT PRIMARY KEY,
                generated_sql TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to create sql_cache table: {e}")))?;
        Ok(())
    }

    /// Looks up `normalized_query`, incrementing `hit_count` and touching
    /// `last_used_at` on a hit. Returns `None` on a miss.
    pub async fn get(&self, normalized_query: &str) -> Result<Option<CacheEntry>> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            "UPDATE sql_cache SET hit_count = hit_count + 1, last_used_at = ?
             WHERE normalized_query = ?
             RETURNING generated_sql, hit_count",
        )
        .bind(&now)
        .bind(normalized_query)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to read SQL cache: {e}")))?;

        Ok(row.map(|r| CacheEntry {
            sql: r.get("generated_sql"),
            hit_count: r.get("hit_count"),
        }))
    }

    /// Upserts `normalized_query -> generated_sql`. If an entry already
    /// exists with the identical SQL, only `hit_count`/`last_used_at` are
    /// bumped; if the SQL differs, it is overwritten and `hit_count` resets.
    pub async fn put(&self, normalized_query: &str, generated_sql: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO sql_cache (normalized_query, generated_sql, created_at, last_used_at, hit_count)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(normalized_query) DO UPDATE SET
                generated_sql = excluded.generated_sql,
                last_used_at = excluded.last_used_at,
                hit_count = CASE
                    WHEN sql_cache.generated_sql = excluded.generated_sql THEN sql_cache.hit_count + 1
                    ELSE 1
                END",
        )
        .bind(normalized_query)
        .bind(generated_sql)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to write SQL cache: {e}")))?;
        Ok(())
    }

    /// Deletes the entry for `normalized_query`, if any (feedback `down`).
    pub async fn invalidate(&self, normalized_query: &str) -> Result<()> {
        sqlx::query("DELETE FROM sql_cache WHERE normalized_query = ?")
            .bind(normalized_query)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::cache_io(format!("failed to invalidate SQL cache entry: {e}")))?;
        Ok(())
    }

    /// Total number of cached entries, surfaced by `GET /health`.
    pub async fn size(&self) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM sql_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::cache_io(format!("failed to count SQL cache: {e}")))?
            .get("c");
        Ok(count)
    }
}

/// Normalizes a rewritten query into the SQL cache key: lowercased,
/// whitespace-collapsed.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
