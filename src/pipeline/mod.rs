//! Conversational NL-to-SQL pipeline (§4.10): the node graph every chat
//! turn and REST call walks through, driven by [`PipelineState`].
//!
//! ```text
//! start -> intent -> (general: done)
//!                  -> (sql|mixed): cache lookup
//!       cache hit  -> validator -> (ok: executor -> interpreter -> done)
//!       cache miss -> schema_analyzer -> generator -> validator -> ...
//!       (validator/executor failure: regenerate, up to MAX_GENERATION_RETRIES)
//! ```

pub mod executor;
mod generator;
mod intent;
pub mod interpreter;
mod schema_analyzer;
mod state;

pub use state::{CacheHitType, Intent, PipelineState, VizSpec, VizType};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{normalize_query, SqlCache};
use crate::constants::{
    DEFAULT_MAX_EXPANDED_TABLES, DEFAULT_MAX_RELEVANT_TABLES, DEFAULT_MAX_SCHEMA_TOKENS,
    DEFAULT_SIMILARITY_THRESHOLD, MAX_GENERATION_RETRIES,
};
use crate::db::DatabaseClient;
use crate::embeddings::{EmbeddingClient, EmbeddingStore};
use crate::error::{AppError, Result};
use crate::llm::LlmClient;
use crate::safety::validate_or_err;
use crate::schema::Schema;
use crate::session::Exchange;

use generator::PriorAttempt;
use schema_analyzer::AnalyzerConfig;

/// Everything a pipeline run needs, borrowed for the duration of one turn.
pub struct PipelineDeps<'a> {
    pub schema: &'a Schema,
    pub db: &'a dyn DatabaseClient,
    pub llm: &'a dyn LlmClient,
    pub embedding_client: &'a dyn EmbeddingClient,
    pub embeddings: &'a EmbeddingStore,
    pub sql_cache: &'a SqlCache,
    pub db_timeout: std::time::Duration,
}

/// Runs intent classification through SQL generation/validation only,
/// stopping short of execution and interpretation. This is the
/// `POST /api/generate-sql` stage of the REST workflow; [`run`] builds on
/// top of it for the SSE chat endpoint, which wants the whole turn at once.
pub async fn generate_sql(state: &mut PipelineState, deps: &PipelineDeps<'_>, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::cancelled("request cancelled before pipeline start"));
    }

    let history = state.conversation_context.clone();
    let classification = intent::classify(
        deps.llm,
        &state.original_query,
        &history,
        &deps.schema.compact_header(),
        &deps.schema.suggested_queries,
    )
    .await?;

    state.intent = classification.intent;
    state.rewritten_query = classification.rewritten_query;
    state.general_answer = classification.general_answer;

    if matches!(state.intent, Intent::General) {
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Err(AppError::cancelled("request cancelled after intent classification"));
    }

    let normalized = normalize_query(&state.rewritten_query);
    let mut prior_failure: Option<(String, String)> = None;

    if let Some(hit) = deps.sql_cache.get(&normalized).await? {
        state.generated_sql = Some(hit.sql.clone());
        state.cache_hit_type = CacheHitType::Sql;
        match validate_or_err(&hit.sql) {
            Ok(()) => {
                state.validation_ok = true;
            }
            Err(e) => {
                warn!("cached SQL failed validation, discarding cache entry: {e}");
                deps.sql_cache.invalidate(&normalized).await?;
                state.cache_hit_type = CacheHitType::None;
                prior_failure = Some((hit.sql, e.to_string()));
            }
        }
    }

    if !state.validation_ok {
        run_schema_and_generate(state, deps, cancel, &normalized, prior_failure).await?;
    }

    Ok(())
}

/// Runs one full conversational turn, mutating `state` in place at each
/// stage and stopping early on cancellation, a general-only intent, or an
/// unrecoverable error. Returns `Ok(())` even when `state.has_error()` is
/// true: callers inspect `state` for the outcome rather than the `Result`,
/// which is reserved for cancellation.
pub async fn run(state: &mut PipelineState, deps: &PipelineDeps<'_>, cancel: &CancellationToken) -> Result<()> {
    generate_sql(state, deps, cancel).await?;

    if matches!(state.intent, Intent::General) || !state.validation_ok {
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Err(AppError::cancelled("request cancelled before execution"));
    }

    let mut sql = state.generated_sql.clone().unwrap_or_default();
    let mut regenerated_after_executor_failure = false;
    let normalized = normalize_query(&state.rewritten_query);

    loop {
        match executor::execute(deps.db, &sql, deps.db_timeout).await {
            Ok(result) => {
                state.columns = result.columns;
                state.rows = result.rows;
                state.total_count_hint = Some(result.total_count);
                break;
            }
            Err(e @ AppError::DbSyntax(_)) if !regenerated_after_executor_failure => {
                regenerated_after_executor_failure = true;
                let msg = e.to_string();
                warn!("executor reported a syntax error, regenerating once: {msg}");
                deps.sql_cache.invalidate(&normalized).await?;
                state.validation_ok = false;

                if cancel.is_cancelled() {
                    return Err(AppError::cancelled("request cancelled before execution"));
                }

                let prior_failure = Some((sql.clone(), msg));
                run_schema_and_generate(state, deps, cancel, &normalized, prior_failure).await?;

                if !state.validation_ok {
                    return Ok(());
                }
                sql = state.generated_sql.clone().unwrap_or_default();
            }
            Err(e) => {
                state.execution_error = Some(e.to_string());
                state.fail("executor", e.to_string());
                return Ok(());
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(AppError::cancelled("request cancelled before interpretation"));
    }

    state.visualization = interpreter::recommend_visualization(&state.columns, &state.rows);
    match interpreter::interpret(
        deps.llm,
        &state.rewritten_query,
        &state.columns,
        &state.rows,
        state.total_count_hint,
    )
    .await
    {
        Ok(text) => state.interpretation = Some(text),
        Err(e) => {
            warn!("interpretation failed, degrading to no summary: {e}");
        }
    }

    if matches!(state.intent, Intent::Mixed) {
        if let Some(general) = &state.general_answer {
            let merged = format!(
                "## Answer\n{general}\n\n---\n\n{}",
                state.interpretation.clone().unwrap_or_default()
            );
            state.interpretation = Some(merged);
        }
    }

    Ok(())
}

/// Schema analysis + generation + validation, retried up to
/// `MAX_GENERATION_RETRIES` times total.
async fn run_schema_and_generate(
    state: &mut PipelineState,
    deps: &PipelineDeps<'_>,
    cancel: &CancellationToken,
    normalized: &str,
    initial_failure: Option<(String, String)>,
) -> Result<()> {
    let analyzer_config = AnalyzerConfig {
        max_relevant_tables: DEFAULT_MAX_RELEVANT_TABLES,
        max_expanded_tables: DEFAULT_MAX_EXPANDED_TABLES,
        similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        max_schema_tokens: DEFAULT_MAX_SCHEMA_TOKENS,
    };

    let analysis = match schema_analyzer::analyze(
        deps.schema,
        deps.embeddings,
        deps.embedding_client,
        &deps.schema.schema_id,
        &state.rewritten_query,
        &analyzer_config,
    )
    .await
    {
        Ok(a) => a,
        Err(e) => {
            state.fail("schema_analyzer", e.to_string());
            return Ok(());
        }
    };

    state.relevant_tables = analysis.relevant_tables;
    state.schema_context = analysis.schema_context;
    state.token_estimate = analysis.token_estimate;

    let mut prior = initial_failure;

    for attempt in 0..MAX_GENERATION_RETRIES {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled("request cancelled during generation"));
        }

        let prior_attempt = prior.as_ref().map(|(sql, err)| PriorAttempt { sql, error: err });
        let sql = match generator::generate(
            deps.llm,
            &state.rewritten_query,
            &state.schema_context,
            deps.schema.database_type,
            prior_attempt,
        )
        .await
        {
            Ok(sql) => sql,
            Err(e) => {
                info!("generation attempt {attempt} failed: {e}");
                state.fail("generator", e.to_string());
                continue;
            }
        };

        match validate_or_err(&sql) {
            Ok(()) => {
                state.generated_sql = Some(sql.clone());
                state.validation_ok = true;
                state.validation_error = None;
                state.error_stage = None;
                state.error_message = None;
                deps.sql_cache.put(normalized, &sql).await?;
                return Ok(());
            }
            Err(e) => {
                state.validation_error = Some(e.to_string());
                state.fail("validator", e.to_string());
                prior = Some((sql, e.to_string()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use std::str::FromStr;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample_schema() -> Schema {
        Schema::parse(
            r#"{
                "schema_id": "acme",
                "source_type": "database",
                "database_type": "sqlite",
                "tables": {
                    "users": {
                        "name": "users",
                        "description": "Application users",
                        "columns": {
                            "id": {"name": "id", "data_type": "integer", "is_primary_key": true},
                            "name": {"name": "name", "data_type": "text"}
                        },
                        "relationships": []
                    }
                },
                "suggested_queries": ["Show all users"]
            }"#,
        )
        .unwrap()
    }

    async fn seeded_db(dir: &tempfile::TempDir) -> Box<dyn DatabaseClient> {
        let path = dir.path().join("pipeline_test.db");
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, name) VALUES (1, 'Alice')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        crate::db::connect(&format!("sqlite://{}", path.display()), 5).await.unwrap()
    }

    #[tokio::test]
    async fn general_intent_short_circuits_before_sql_stages() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let db = seeded_db(&dir).await;
        let llm = MockLlmClient::new().with_response(
            "intent",
            r#"{"intent": "general", "rewritten_query": null, "general_answer": "SQL is declarative."}"#,
        );
        let embedding_client = crate::embeddings::MockEmbeddingClient::new();
        let embeddings = EmbeddingStore::open(&dir.path().join("emb.db")).await.unwrap();
        let sql_cache = SqlCache::open(&dir.path().join("cache.db")).await.unwrap();

        let deps = PipelineDeps {
            schema: &schema,
            db: db.as_ref(),
            llm: &llm,
            embedding_client: &embedding_client,
            embeddings: &embeddings,
            sql_cache: &sql_cache,
            db_timeout: Duration::from_secs(5),
        };

        let mut state = PipelineState::new("what is SQL?".to_string(), "s1".to_string(), vec![]);
        run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

        assert_eq!(state.intent, Intent::General);
        assert!(state.rows.is_empty());
        assert!(!state.has_error());
    }

    #[tokio::test]
    async fn sql_intent_runs_full_pipeline_to_interpretation() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let db = seeded_db(&dir).await;
        let llm = MockLlmClient::new().with_response(
            "intent",
            r#"{"intent": "sql", "rewritten_query": "show all users", "general_answer": null}"#,
        );
        let embedding_client = crate::embeddings::MockEmbeddingClient::new();
        let embeddings = EmbeddingStore::open(&dir.path().join("emb.db")).await.unwrap();
        embeddings
            .put("acme", "users", &embedding_client.embed("application users").await.unwrap())
            .await
            .unwrap();
        let sql_cache = SqlCache::open(&dir.path().join("cache.db")).await.unwrap();

        let deps = PipelineDeps {
            schema: &schema,
            db: db.as_ref(),
            llm: &llm,
            embedding_client: &embedding_client,
            embeddings: &embeddings,
            sql_cache: &sql_cache,
            db_timeout: Duration::from_secs(5),
        };

        let mut state = PipelineState::new("show all users".to_string(), "s1".to_string(), vec![]);
        run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

        assert!(!state.has_error(), "pipeline error: {:?}", state.error_message);
        assert!(state.validation_ok);
        assert_eq!(state.rows.len(), 1);
        assert!(state.interpretation.is_some());
    }

    #[tokio::test]
    async fn executor_syntax_error_triggers_one_regeneration() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let db = seeded_db(&dir).await;
        let llm = MockLlmClient::new()
            .with_response(
                "intent",
                r#"{"intent": "sql", "rewritten_query": "show all users", "general_answer": null}"#,
            )
            // Checked before the generic pattern below: matches only the retry prompt.
            .with_response("previous attempt failed", "```sql\nSELECT * FROM users\n```")
            // References a table absent from the live database: passes the validator
            // but fails at execution with a real DBSyntax error.
            .with_response("write a single read-only select", "```sql\nSELECT * FROM ghosts\n```");
        let embedding_client = crate::embeddings::MockEmbeddingClient::new();
        let embeddings = EmbeddingStore::open(&dir.path().join("emb.db")).await.unwrap();
        embeddings
            .put("acme", "users", &embedding_client.embed("application users").await.unwrap())
            .await
            .unwrap();
        let sql_cache = SqlCache::open(&dir.path().join("cache.db")).await.unwrap();

        let deps = PipelineDeps {
            schema: &schema,
            db: db.as_ref(),
            llm: &llm,
            embedding_client: &embedding_client,
            embeddings: &embeddings,
            sql_cache: &sql_cache,
            db_timeout: Duration::from_secs(5),
        };

        let mut state = PipelineState::new("show all users".to_string(), "s1".to_string(), vec![]);
        run(&mut state, &deps, &CancellationToken::new()).await.unwrap();

        assert!(!state.has_error(), "pipeline error: {:?}", state.error_message);
        assert_eq!(state.generated_sql.as_deref(), Some("SELECT * FROM users"));
        assert_eq!(state.rows.len(), 1);

        let cached = sql_cache.get(&normalize_query("show all users")).await.unwrap();
        assert_eq!(cached.unwrap().sql, "SELECT * FROM users");
    }

    /// A request cancelled before the pipeline ever starts leaves no trace:
    /// no SQL is generated and the cache gains no entry (P10).
    #[tokio::test]
    async fn cancellation_before_start_leaves_cache_and_state_untouched() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let db = seeded_db(&dir).await;
        let llm = MockLlmClient::new();
        let embedding_client = crate::embeddings::MockEmbeddingClient::new();
        let embeddings = EmbeddingStore::open(&dir.path().join("emb.db")).await.unwrap();
        let sql_cache = SqlCache::open(&dir.path().join("cache.db")).await.unwrap();

        let deps = PipelineDeps {
            schema: &schema,
            db: db.as_ref(),
            llm: &llm,
            embedding_client: &embedding_client,
            embeddings: &embeddings,
            sql_cache: &sql_cache,
            db_timeout: Duration::from_secs(5),
        };

        let mut state = PipelineState::new("show all users".to_string(), "s1".to_string(), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run(&mut state, &deps, &cancel).await;

        assert!(result.is_err());
        assert!(state.generated_sql.is_none());
        assert_eq!(sql_cache.size().await.unwrap(), 0, "no stage ran, so the cache gained no entry");
    }

    #[test]
    fn exchange_history_is_clonable_for_prompt_injection() {
        let e = Exchange {
            user_message: "hi".to_string(),
            generated_sql: None,
            timestamp: chrono::Utc::now(),
        };
        let cloned = e.clone();
        assert_eq!(cloned.user_message, "hi");
    }
}
