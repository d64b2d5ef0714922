//! Limits, thresholds, TTLs, and other constants shared across the pipeline (C16).
//!
//! Every value here is an environment-overridable default; see [`crate::config::AppConfig`].

use std::time::Duration;

/// Top-k tables kept after semantic retrieval (`MAX_RELEVANT_TABLES`).
pub const DEFAULT_MAX_RELEVANT_TABLES: usize = 5;

/// Cap on the FK-expanded table set (`MAX_EXPANDED_TABLES`).
pub const DEFAULT_MAX_EXPANDED_TABLES: usize = 15;

/// Minimum cosine similarity for a table to be considered relevant.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.15;

/// Token budget for the schema context string handed to the SQL generator.
pub const DEFAULT_MAX_SCHEMA_TOKENS: usize = 8000;

/// Row cap for the executor's preview / session query cache.
pub const DEFAULT_MAX_CACHE_ROWS: usize = 50;

/// Row cap returned by `GET /api/execute/{query_id}`.
pub const DEFAULT_PREVIEW_ROWS: usize = 50;

/// Session TTL measured from `last_touched`.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 600;

/// Interval of the session-store eviction sweep.
pub const SESSION_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Rows per chunk for CSV download streaming.
pub const DEFAULT_CSV_CHUNK_SIZE: usize = 1000;

/// Smart-count cap: exact counts are returned up to this size, `unknown` above it.
pub const SMART_COUNT_CAP: i64 = 1000;

/// Exchanges retained per session (stored).
pub const SESSION_HISTORY_STORED: usize = 5;

/// Exchanges injected into LLM prompts (most recent subset of stored).
pub const SESSION_HISTORY_INJECTED: usize = 3;

/// Global retry budget for the generator/validator/executor loop.
pub const MAX_GENERATION_RETRIES: u32 = 3;

/// Timeout for a single LLM call.
pub const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a preview DB query outside of chat streaming.
pub const DB_PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a preview DB query during chat streaming (executor stage).
pub const DB_CHAT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(45);

/// Per-chunk timeout while streaming a CSV download.
pub const DB_STREAM_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall HTTP request timeout for non-streaming endpoints.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Keep-alive comment cadence on the SSE chat endpoint.
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Grace period for in-flight requests during shutdown.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default connection pool size for the database adapter.
pub const DEFAULT_DB_POOL_SIZE: u32 = 5;

/// Rows sampled per table when schema context includes sample rows.
pub const SCHEMA_CONTEXT_SAMPLE_ROWS: usize = 3;

/// Rows fed to the interpreter's LLM insight call.
pub const INTERPRETER_MAX_ROWS: usize = 50;

/// Max distinct values for a string column to be treated as a grouping axis.
pub const INTERPRETER_GROUPING_CARDINALITY: usize = 10;

/// Estimates a token count from text length, matching the source's `len(text)/4` contract.
///
/// Preserved verbatim as the parity contract for `MAX_SCHEMA_TOKENS` comparisons.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
