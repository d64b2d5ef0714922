//! Process-wide application context (§9 Design Notes).
//!
//! Every singleton the pipeline and HTTP layer depend on is grouped here,
//! built once at bootstrap, and passed around as `Arc<AppContext>` — no
//! module-level globals.

use std::sync::Arc;

use crate::cache::SqlCache;
use crate::config::AppConfig;
use crate::db::DatabaseClient;
use crate::embeddings::{EmbeddingClient, EmbeddingStore, HttpEmbeddingClient, MockEmbeddingClient};
use crate::error::Result;
use crate::llm::LlmClient;
use crate::schema::Schema;
use crate::session::SessionStore;

pub struct AppContext {
    pub config: AppConfig,
    pub schema: Arc<Schema>,
    pub db: Arc<dyn DatabaseClient>,
    pub llm: Arc<dyn LlmClient>,
    pub embedding_client: Arc<dyn EmbeddingClient>,
    pub embeddings: EmbeddingStore,
    pub sql_cache: SqlCache,
    pub sessions: Arc<SessionStore>,
}

impl AppContext {
    /// Builds every singleton from `config`. Does not perform the drift
    /// check, warmup, or route registration — those are [`crate::bootstrap`]'s job.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let schema = Arc::new(Schema::load(&config.canonical_schema_path)?);
        let db: Arc<dyn DatabaseClient> = Arc::from(
            crate::db::connect(&config.database_url, crate::constants::DEFAULT_DB_POOL_SIZE).await?,
        );
        let llm: Arc<dyn LlmClient> = Arc::from(crate::llm::create_client(&config)?);
        let embedding_client: Arc<dyn EmbeddingClient> = build_embedding_client(&config);
        let embeddings = EmbeddingStore::open(&config.embedding_store_path()).await?;
        let sql_cache = SqlCache::open(&config.sql_cache_path()).await?;
        let sessions = Arc::new(SessionStore::new(std::time::Duration::from_secs(
            config.cache_ttl_seconds,
        )));

        Ok(Self {
            config,
            schema,
            db,
            llm,
            embedding_client,
            embeddings,
            sql_cache,
            sessions,
        })
    }
}

fn build_embedding_client(config: &AppConfig) -> Arc<dyn EmbeddingClient> {
    if config.llm_provider == "mock" {
        return Arc::new(MockEmbeddingClient::new());
    }

    match std::env::var("EMBEDDING_API_KEY").ok().or_else(|| config.llm_api_key()) {
        Some(api_key) => {
            let embedding_config = crate::embeddings::EmbeddingConfig::new(api_key, "text-embedding-3-small");
            match HttpEmbeddingClient::new(embedding_config) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    tracing::warn!("failed to build HTTP embedding client, falling back to mock: {e}");
                    Arc::new(MockEmbeddingClient::new())
                }
            }
        }
        None => {
            tracing::warn!("no embedding API key configured, falling back to mock embeddings");
            Arc::new(MockEmbeddingClient::new())
        }
    }
}
