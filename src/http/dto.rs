//! Wire types for the REST and SSE surfaces (§6.3/§6.4).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::db::Value;
use crate::pipeline::VizSpec;
use crate::schema::SchemaOverview;

/// Renders a database [`Value`] as a native JSON scalar rather than the
/// enum's derived `{"Variant": ...}` tagging, which the wire format never
/// wants to expose.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => {
            use base64::Engine;
            Json::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateSqlRequest {
    pub query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateSqlResponse {
    pub query_id: String,
    pub sql: Option<String>,
    pub intent: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub general_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_overview: Option<SchemaOverview>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub data: Vec<Vec<Json>>,
    pub columns: Vec<String>,
    pub total_count: crate::db::TotalCount,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct InterpretResponse {
    pub interpretation: String,
    pub visualization: Option<VizSpec>,
    pub data_truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub query_id: String,
    pub verdict: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_size: i64,
    pub database_connected: bool,
    pub schema_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionEvent {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SqlEvent {
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct DataEvent {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Json>>,
    pub total_count: crate::db::TotalCount,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct AnalysisEvent {
    pub interpretation: String,
    pub visualization: Option<VizSpec>,
}
