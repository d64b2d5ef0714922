//! Persistent embedding store (C3).
//!
//! `(namespace, table_name) -> float32 vector`, backed by a single SQLite
//! file opened through [`crate::persistence::open_pool`]. Vectors are stored
//! as a little-endian `f32` blob; the store does not assume a fixed
//! dimension, but every entry in one namespace must share the same one.

use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::error::{AppError, Result};

use super::cosine_similarity;

#[derive(Clone)]
pub struct EmbeddingStore {
    pool: SqlitePool,
}

impl EmbeddingStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::persistence::open_pool(path).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embeddings (
                namespace TEXT NOT NULL,
                table_name TEXT NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (namespace, table_name)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to create embeddings table: {e}")))?;
        Ok(())
    }

    /// Upserts the embedding for `table_name` within `namespace`.
    pub async fn put(&self, namespace: &str, table_name: &str, vector: &[f32]) -> Result<()> {
        let blob = encode(vector);
        sqlx::query(
            "INSERT INTO embeddings (namespace, table_name, vector) VALUES (?, ?, ?)
             ON CONFLICT(namespace, table_name) DO UPDATE SET vector = excluded.vector",
        )
        .bind(namespace)
        .bind(table_name)
        .bind(blob)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to store embedding: {e}")))?;
        Ok(())
    }

    /// Returns the stored vector for `(namespace, table_name)`, if any.
    pub async fn get(&self, namespace: &str, table_name: &str) -> Result<Option<Vec<f32>>> {
        let row = sqlx::query("SELECT vector FROM embeddings WHERE namespace = ? AND table_name = ?")
            .bind(namespace)
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::cache_io(format!("failed to read embedding: {e}")))?;

        Ok(row.map(|r| decode(r.get::<Vec<u8>, _>("vector"))))
    }

    /// Returns true if `namespace` has no stored embeddings.
    pub async fn is_empty(&self, namespace: &str) -> Result<bool> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM embeddings WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::cache_io(format!("failed to count embeddings: {e}")))?
            .get("c");
        Ok(count == 0)
    }

    /// Ranks every table embedded in `namespace` against `query_vector` by
    /// cosine similarity, descending, returning at most `k` entries.
    pub async fn top_k(
        &self,
        namespace: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let rows = sqlx::query("SELECT table_name, vector FROM embeddings WHERE namespace = ?")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::cache_io(format!("failed to scan embeddings: {e}")))?;

        let mut scored: Vec<(String, f32)> = rows
            .into_iter()
            .map(|row| {
                let table_name: String = row.get("table_name");
                let vector = decode(row.get::<Vec<u8>, _>("vector"));
                let score = cosine_similarity(query_vector, &vector);
                (table_name, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode(bytes: Vec<u8>) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("store.db")).await.unwrap();
        store.put("acme", "users", &[0.1, 0.2, 0.3]).await.unwrap();

        let got = store.get("acme", "users").await.unwrap().unwrap();
        assert!((got[0] - 0.1).abs() < 1e-6);
        assert!((got[1] - 0.2).abs() < 1e-6);
        assert!((got[2] - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_entry_is_none() {
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("store.db")).await.unwrap();
        assert!(store.get("acme", "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_vector() {
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("store.db")).await.unwrap();
        store.put("acme", "users", &[1.0, 0.0]).await.unwrap();
        store.put("acme", "users", &[0.0, 1.0]).await.unwrap();

        let got = store.get("acme", "users").await.unwrap().unwrap();
        assert_eq!(got, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn is_empty_reports_per_namespace() {
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("store.db")).await.unwrap();
        assert!(store.is_empty("acme").await.unwrap());

        store.put("acme", "users", &[1.0]).await.unwrap();
        assert!(!store.is_empty("acme").await.unwrap());
        assert!(store.is_empty("other").await.unwrap());
    }

    #[tokio::test]
    async fn top_k_ranks_by_cosine_similarity_descending() {
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::open(&dir.path().join("store.db")).await.unwrap();
        store.put("acme", "users", &[1.0, 0.0]).await.unwrap();
        store.put("acme", "orders", &[0.0, 1.0]).await.unwrap();
        store.put("acme", "accounts", &[0.9, 0.1]).await.unwrap();

        let ranked = store.top_k("acme", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "users");
        assert_eq!(ranked[1].0, "accounts");
    }
}
