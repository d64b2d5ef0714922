//! Error types for the NL-to-SQL service.
//!
//! A single taxonomy covers bootstrap, pipeline stages, and outbound clients.
//! Every variant maps to a stable `error_code()` string used in HTTP/SSE
//! responses and an HTTP status via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for the service.
#[derive(Error, Debug)]
pub enum AppError {
    /// Canonical schema JSON failed validation at load time.
    #[error("Invalid schema: {0}")]
    SchemaInvalid(String),

    /// Live database is missing a table/column the canonical schema declares.
    #[error("Schema drift detected: {0}")]
    SchemaDrift(String),

    /// The embedding store has no entries in the active namespace.
    #[error("Embedding store is empty: {0}")]
    SchemaEmpty(String),

    /// Embedding client failed after the analyzer's single retry.
    #[error("Failed to embed query: {0}")]
    SchemaEmbed(String),

    /// Intent classifier output was not valid JSON after one retry.
    #[error("Failed to parse intent classification: {0}")]
    IntentParse(String),

    /// Persistent cache read/write failure.
    #[error("Cache error: {0}")]
    CacheIO(String),

    /// SQL generator exhausted its retry budget.
    #[error("SQL generation failed: {0}")]
    SqlGen(String),

    /// SQL rejected by the safety validator.
    #[error("Query rejected: {0}")]
    Validation(String),

    /// Query exceeded its execution timeout.
    #[error("Query timed out: {0}")]
    DbTimeout(String),

    /// Query failed to parse/execute against the live database.
    #[error("Database syntax error: {0}")]
    DbSyntax(String),

    /// Database rejected the connection or statement for permission reasons.
    #[error("Database permission error: {0}")]
    DbPermission(String),

    /// Could not establish or maintain a database connection.
    #[error("Database connection error: {0}")]
    DbConn(String),

    /// Insight generation failed; callers should degrade gracefully.
    #[error("Interpretation failed: {0}")]
    Interpret(String),

    /// Request was cancelled or timed out.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// LLM client failure not otherwise classified (auth, rate limit, transport).
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested resource (query_id, session) does not exist or has expired.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn schema_invalid(msg: impl Into<String>) -> Self {
        Self::SchemaInvalid(msg.into())
    }
    pub fn schema_drift(msg: impl Into<String>) -> Self {
        Self::SchemaDrift(msg.into())
    }
    pub fn schema_empty(msg: impl Into<String>) -> Self {
        Self::SchemaEmpty(msg.into())
    }
    pub fn schema_embed(msg: impl Into<String>) -> Self {
        Self::SchemaEmbed(msg.into())
    }
    pub fn intent_parse(msg: impl Into<String>) -> Self {
        Self::IntentParse(msg.into())
    }
    pub fn cache_io(msg: impl Into<String>) -> Self {
        Self::CacheIO(msg.into())
    }
    pub fn sql_gen(msg: impl Into<String>) -> Self {
        Self::SqlGen(msg.into())
    }
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
    pub fn db_timeout(msg: impl Into<String>) -> Self {
        Self::DbTimeout(msg.into())
    }
    pub fn db_syntax(msg: impl Into<String>) -> Self {
        Self::DbSyntax(msg.into())
    }
    pub fn db_permission(msg: impl Into<String>) -> Self {
        Self::DbPermission(msg.into())
    }
    pub fn db_conn(msg: impl Into<String>) -> Self {
        Self::DbConn(msg.into())
    }
    pub fn interpret(msg: impl Into<String>) -> Self {
        Self::Interpret(msg.into())
    }
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code included in every HTTP/SSE error payload.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SchemaInvalid(_) => "SchemaInvalid",
            Self::SchemaDrift(_) => "SchemaDrift",
            Self::SchemaEmpty(_) => "SchemaEmpty",
            Self::SchemaEmbed(_) => "SchemaEmbed",
            Self::IntentParse(_) => "IntentParse",
            Self::CacheIO(_) => "CacheIO",
            Self::SqlGen(_) => "SQLGen",
            Self::Validation(_) => "Validation",
            Self::DbTimeout(_) => "DBTimeout",
            Self::DbSyntax(_) => "DBSyntax",
            Self::DbPermission(_) => "DBPermission",
            Self::DbConn(_) => "DBConn",
            Self::Interpret(_) => "Interpret",
            Self::Cancelled(_) => "Cancelled",
            Self::Llm(_) => "Llm",
            Self::Config(_) => "Config",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "Internal",
        }
    }

    /// The pipeline stage this error originated in, if applicable.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::SchemaInvalid(_) | Self::SchemaDrift(_) => Some("bootstrap"),
            Self::SchemaEmpty(_) | Self::SchemaEmbed(_) => Some("schema_analyzer"),
            Self::IntentParse(_) => Some("intent"),
            Self::SqlGen(_) => Some("generator"),
            Self::Validation(_) => Some("validator"),
            Self::DbTimeout(_) | Self::DbSyntax(_) | Self::DbPermission(_) | Self::DbConn(_) => {
                Some("executor")
            }
            Self::Interpret(_) => Some("interpreter"),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::IntentParse(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            Self::DbTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::DbPermission(_) => StatusCode::FORBIDDEN,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire shape for every error response, REST and SSE alike.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.to_string(),
            error_code: err.error_code(),
            stage: err.stage(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::from(&self);
        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable_per_variant() {
        assert_eq!(AppError::schema_invalid("x").error_code(), "SchemaInvalid");
        assert_eq!(AppError::validation("DELETE").error_code(), "Validation");
        assert_eq!(AppError::db_timeout("30s").error_code(), "DBTimeout");
        assert_eq!(AppError::cancelled("client gone").error_code(), "Cancelled");
    }

    #[test]
    fn display_messages_include_context() {
        let err = AppError::validation("blocked keyword DELETE");
        assert_eq!(err.to_string(), "Query rejected: blocked keyword DELETE");
    }

    #[test]
    fn stage_is_set_for_pipeline_errors_only() {
        assert_eq!(AppError::sql_gen("x").stage(), Some("generator"));
        assert_eq!(AppError::internal("x").stage(), None);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AppError>();
    }
}
