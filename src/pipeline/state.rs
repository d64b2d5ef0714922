//! Pipeline state (§3.6): the single record threaded through every stage.

use crate::db::{ColumnInfo, Row, TotalCount};
use crate::session::Exchange;

/// Where a request landed after intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Sql,
    General,
    Mixed,
}

/// Whether `generated_sql` came from the SQL cache or a fresh generator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHitType {
    None,
    Sql,
}

/// A chart/table recommendation produced by the interpreter's rule-based selector.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VizSpec {
    #[serde(rename = "type")]
    pub viz_type: VizType,
    pub title: String,
    pub x_column: String,
    pub y_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_column: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VizType {
    Line,
    Bar,
    Pie,
    Scatter,
}

/// The single record passed through every pipeline stage; mutated in place
/// by whichever stage currently owns it.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub original_query: String,
    pub session_id: String,
    pub conversation_context: Vec<Exchange>,

    pub intent: Intent,
    pub general_answer: Option<String>,
    pub rewritten_query: String,

    pub cache_hit_type: CacheHitType,
    pub generated_sql: Option<String>,

    pub relevant_tables: Vec<String>,
    pub schema_context: String,
    pub token_estimate: usize,

    pub validation_ok: bool,
    pub validation_error: Option<String>,

    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub total_count_hint: Option<TotalCount>,
    pub execution_error: Option<String>,

    pub interpretation: Option<String>,
    pub visualization: Option<VizSpec>,

    pub error_stage: Option<&'static str>,
    pub error_message: Option<String>,
}

impl PipelineState {
    pub fn new(original_query: String, session_id: String, conversation_context: Vec<Exchange>) -> Self {
        Self {
            rewritten_query: original_query.clone(),
            original_query,
            session_id,
            conversation_context,
            intent: Intent::Sql,
            general_answer: None,
            cache_hit_type: CacheHitType::None,
            generated_sql: None,
            relevant_tables: Vec::new(),
            schema_context: String::new(),
            token_estimate: 0,
            validation_ok: false,
            validation_error: None,
            columns: Vec::new(),
            rows: Vec::new(),
            total_count_hint: None,
            execution_error: None,
            interpretation: None,
            visualization: None,
            error_stage: None,
            error_message: None,
        }
    }

    pub fn fail(&mut self, stage: &'static str, message: impl Into<String>) {
        self.error_stage = Some(stage);
        self.error_message = Some(message.into());
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}
