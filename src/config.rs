//! Configuration management for the service.
//!
//! Layering, low to high precedence: built-in constants (`crate::constants`) <
//! optional TOML file < environment variables. `.env` is loaded via `dotenvy`
//! before anything reads the environment (see `main.rs`).

use crate::constants;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide configuration, fully resolved before bootstrap runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider: "anthropic", "openai", or "mock".
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,

    /// Model name passed to the LLM client.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Database connection URL (`sqlite://path` or `postgres://...`).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Namespace shared by the embedding store and SQL cache; also used to
    /// locate the canonical schema file's default sibling cache files.
    #[serde(default = "default_schema_id")]
    pub schema_id: String,

    /// Path to the canonical schema JSON file (§6.1).
    #[serde(default = "default_canonical_schema_path")]
    pub canonical_schema_path: PathBuf,

    /// Directory holding the SQL cache and embedding store SQLite files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Allowed CORS origins, comma-separated in the environment.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default = "default_max_relevant_tables")]
    pub max_relevant_tables: usize,
    #[serde(default = "default_max_expanded_tables")]
    pub max_expanded_tables: usize,
    #[serde(default = "default_max_schema_tokens")]
    pub max_schema_tokens: usize,
    #[serde(default = "default_max_cache_rows")]
    pub max_cache_rows: usize,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_csv_chunk_size")]
    pub csv_chunk_size: usize,

    /// Bind address for the HTTP server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_llm_provider() -> String {
    "mock".to_string()
}
fn default_llm_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}
fn default_database_url() -> String {
    "sqlite://data.db".to_string()
}
fn default_schema_id() -> String {
    "default".to_string()
}
fn default_canonical_schema_path() -> PathBuf {
    PathBuf::from("schema.json")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_relevant_tables() -> usize {
    constants::DEFAULT_MAX_RELEVANT_TABLES
}
fn default_max_expanded_tables() -> usize {
    constants::DEFAULT_MAX_EXPANDED_TABLES
}
fn default_max_schema_tokens() -> usize {
    constants::DEFAULT_MAX_SCHEMA_TOKENS
}
fn default_max_cache_rows() -> usize {
    constants::DEFAULT_MAX_CACHE_ROWS
}
fn default_preview_rows() -> usize {
    constants::DEFAULT_PREVIEW_ROWS
}
fn default_cache_ttl_seconds() -> u64 {
    constants::DEFAULT_CACHE_TTL_SECONDS
}
fn default_csv_chunk_size() -> usize {
    constants::DEFAULT_CSV_CHUNK_SIZE
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_llm_provider(),
            llm_model: default_llm_model(),
            database_url: default_database_url(),
            schema_id: default_schema_id(),
            canonical_schema_path: default_canonical_schema_path(),
            data_dir: default_data_dir(),
            cors_allowed_origins: Vec::new(),
            max_relevant_tables: default_max_relevant_tables(),
            max_expanded_tables: default_max_expanded_tables(),
            max_schema_tokens: default_max_schema_tokens(),
            max_cache_rows: default_max_cache_rows(),
            preview_rows: default_preview_rows(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            csv_chunk_size: default_csv_chunk_size(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AppConfig {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nlsql")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AppError::config(format!("Failed to read config file: {e}")))?;
            Self::parse_toml(&content, path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            AppError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Applies environment variables as overrides (higher precedence than file/defaults).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm_provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm_model = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("SCHEMA_ID") {
            self.schema_id = v;
        }
        if let Ok(v) = std::env::var("CANONICAL_SCHEMA_PATH") {
            self.canonical_schema_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = env_usize("MAX_RELEVANT_TABLES") {
            self.max_relevant_tables = v;
        }
        if let Ok(v) = env_usize("MAX_EXPANDED_TABLES") {
            self.max_expanded_tables = v;
        }
        if let Ok(v) = env_usize("MAX_SCHEMA_TOKENS") {
            self.max_schema_tokens = v;
        }
        if let Ok(v) = env_usize("MAX_CACHE_ROWS") {
            self.max_cache_rows = v;
        }
        if let Ok(v) = env_usize("PREVIEW_ROWS") {
            self.preview_rows = v;
        }
        if let Ok(v) = std::env::var("CACHE_TTL_SECONDS").ok().and_then(|s| s.parse().ok()) {
            self.cache_ttl_seconds = v;
        }
        if let Ok(v) = env_usize("CSV_CHUNK_SIZE") {
            self.csv_chunk_size = v;
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            self.bind_addr = v;
        }
    }

    /// Resolves the LLM API key from the environment, named for the configured provider.
    pub fn llm_api_key(&self) -> Option<String> {
        match self.llm_provider.as_str() {
            "anthropic" => std::env::var("ANTHROPIC_API_KEY").ok(),
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        }
    }

    /// Path to the SQL cache SQLite file for the configured schema_id.
    pub fn sql_cache_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.sql_cache.db", self.schema_id))
    }

    /// Path to the embedding store SQLite file for the configured schema_id.
    pub fn embedding_store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.embeddings.db", self.schema_id))
    }
}

fn env_usize(name: &str) -> std::result::Result<usize, ()> {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).ok_or(())
}
