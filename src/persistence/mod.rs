//! Shared SQLite pool-opening helper for the SQL cache and embedding store.
//!
//! Both persistent stores are single-file SQLite databases opened with the
//! same WAL-mode, retry-with-backoff, and corruption-recovery policy; this
//! module centralizes that policy so each store only owns its own schema.

use crate::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 100;

/// Opens (creating if needed) a SQLite pool at `path` in WAL mode, retrying
/// transient failures with exponential backoff and recovering from a
/// corrupted file by backing it up and recreating it.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    ensure_parent_dirs(path)?;

    match try_open(path).await {
        Ok(pool) => Ok(pool),
        Err(e) => {
            warn!("Failed to open {}: {e}. Attempting recovery...", path.display());
            attempt_recovery(path).await
        }
    }
}

async fn try_open(path: &Path) -> Result<SqlitePool> {
    let mut last_error = None;

    for attempt in 0..MAX_RETRY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(attempt))).await;
        }

        match connect(path).await {
            Ok(pool) => {
                info!("Opened SQLite store at {}", path.display());
                return Ok(pool);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::cache_io("failed to open database after retries")))
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    let conn_str = format!("sqlite:{}?mode=rwc", path.display());
    let options = SqliteConnectOptions::from_str(&conn_str)
        .map_err(|e| AppError::cache_io(format!("invalid database path: {e}")))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to connect to {}: {e}", path.display())))
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::cache_io(format!("failed to create directory {}: {e}", parent.display()))
            })?;
        }
    }
    Ok(())
}

async fn attempt_recovery(path: &Path) -> Result<SqlitePool> {
    let backup_path = path.with_extension("db.bak");

    if path.exists() {
        std::fs::rename(path, &backup_path).map_err(|e| {
            AppError::cache_io(format!(
                "failed to back up corrupted database to {}: {e}",
                backup_path.display()
            ))
        })?;
        warn!("Backed up corrupted database to {}", backup_path.display());
    }

    try_open(path)
        .await
        .map_err(|e| AppError::cache_io(format!("failed to recreate database after backup: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_pool_creates_database_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let pool = open_pool(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
