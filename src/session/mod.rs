//! In-memory, TTL-bounded session store (C5).
//!
//! Keyed by `session_id` in a [`dashmap::DashMap`] (global map guarded by a
//! concurrent hash map, per §5); each session's own mutations are serialized
//! behind a per-session `tokio::sync::Mutex` so history writes are
//! linearizable without blocking unrelated sessions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::constants::SESSION_HISTORY_STORED;
use crate::db::{ColumnInfo, Row, TotalCount};

/// One exchange in a session's conversation history.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user_message: String,
    pub generated_sql: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Cached result set for one `query_id`, scoped to and evicted with its session.
#[derive(Debug, Clone)]
pub struct QueryCacheEntry {
    pub sql: String,
    pub original_query: String,
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnInfo>,
    pub total_count: Option<TotalCount>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A single conversation's state: history ring buffer plus the query-result
/// cache addressed by the four-step REST workflow.
pub struct Session {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_touched: chrono::DateTime<chrono::Utc>,
    pub history: VecDeque<Exchange>,
    pub queries: std::collections::HashMap<String, QueryCacheEntry>,
}

impl Session {
    fn new() -> Self {
        let now = chrono::Utc::now();
        Self {
            created_at: now,
            last_touched: now,
            history: VecDeque::new(),
            queries: std::collections::HashMap::new(),
        }
    }

    fn push_exchange(&mut self, exchange: Exchange) {
        self.history.push_back(exchange);
        while self.history.len() > SESSION_HISTORY_STORED {
            self.history.pop_front();
        }
    }

    /// Returns the most recent `n` exchanges, oldest first, for prompt injection.
    pub fn recent(&self, n: usize) -> Vec<Exchange> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }
}

/// Process-wide session store. Shared via `Arc` by the HTTP layer and pipeline.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Returns the session for `session_id`, creating a fresh one if absent
    /// or expired. Returns the resolved id (a new uuid when `session_id` is
    /// `None`) and a handle to the session.
    pub fn get_or_create(&self, session_id: Option<String>) -> (String, Arc<Mutex<Session>>) {
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(existing) = self.sessions.get(&id) {
            if !self.is_expired(&existing) {
                return (id, existing.clone());
            }
        }

        let session = Arc::new(Mutex::new(Session::new()));
        self.sessions.insert(id.clone(), session.clone());
        (id, session)
    }

    /// Looks up a session without creating one; `None` if absent or expired.
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        let entry = self.sessions.get(session_id)?;
        if self.is_expired(&entry) {
            return None;
        }
        Some(entry.clone())
    }

    fn is_expired(&self, session: &Arc<Mutex<Session>>) -> bool {
        let last_touched = session
            .try_lock()
            .map(|s| s.last_touched)
            .unwrap_or_else(|_| chrono::Utc::now());
        chrono::Utc::now().signed_duration_since(last_touched)
            > chrono::Duration::from_std(self.ttl).unwrap_or_default()
    }

    /// Records a user/assistant exchange and bumps `last_touched`.
    pub async fn record_exchange(&self, session_id: &str, exchange: Exchange) {
        let (_, session) = self.get_or_create(Some(session_id.to_string()));
        let mut guard = session.lock().await;
        guard.last_touched = chrono::Utc::now();
        guard.push_exchange(exchange);
    }

    /// Stores a query's cached rows under `query_id`.
    pub async fn store_query(&self, session_id: &str, query_id: &str, entry: QueryCacheEntry) {
        let (_, session) = self.get_or_create(Some(session_id.to_string()));
        let mut guard = session.lock().await;
        guard.last_touched = chrono::Utc::now();
        guard.queries.insert(query_id.to_string(), entry);
    }

    /// Fetches a previously stored query result, across any live session
    /// (query_ids are opaque and unique; the caller need not track which
    /// session produced them).
    pub async fn find_query(&self, query_id: &str) -> Option<QueryCacheEntry> {
        for entry in self.sessions.iter() {
            if self.is_expired(entry.value()) {
                continue;
            }
            let guard = entry.value().lock().await;
            if let Some(found) = guard.queries.get(query_id) {
                return Some(found.clone());
            }
        }
        None
    }

    /// Overwrites a previously stored query result in place, across any live
    /// session. Returns `false` if `query_id` is not found in any live
    /// session (expired or never stored).
    pub async fn update_query(&self, query_id: &str, entry: QueryCacheEntry) -> bool {
        for session in self.sessions.iter() {
            if self.is_expired(session.value()) {
                continue;
            }
            let mut guard = session.value().lock().await;
            if guard.queries.contains_key(query_id) {
                guard.last_touched = chrono::Utc::now();
                guard.queries.insert(query_id.to_string(), entry);
                return true;
            }
        }
        false
    }

    /// Removes every session whose `last_touched` is older than the TTL.
    pub fn sweep(&self) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_default();
        self.sessions.retain(|_, session| {
            let last_touched = session
                .try_lock()
                .map(|s| s.last_touched)
                .unwrap_or_else(|_| chrono::Utc::now());
            chrono::Utc::now().signed_duration_since(last_touched) <= ttl
        });
    }

    /// Number of live sessions, not accounting for expiry between sweeps.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Spawns the periodic eviction sweep (`SESSION_SWEEP_INTERVAL_SECONDS`).
pub fn spawn_sweeper(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            crate::constants::SESSION_SWEEP_INTERVAL_SECONDS,
        ));
        loop {
            interval.tick().await;
            store.sweep();
        }
    })
}
