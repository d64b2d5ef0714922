//! REST handlers (§6.3): the four-step generate/execute/interpret/download
//! workflow plus schema overview, feedback, and health.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;

use crate::cache::normalize_query;
use crate::constants::{DB_PREVIEW_TIMEOUT, DB_STREAM_CHUNK_TIMEOUT};
use crate::context::AppContext;
use crate::db::TotalCount;
use crate::error::{AppError, ErrorResponse, Result};
use crate::pipeline::{self, Intent, PipelineDeps, PipelineState};
use crate::session::{Exchange, QueryCacheEntry};

use super::dto::{
    value_to_json, ExecuteResponse, FeedbackRequest, GenerateSqlRequest, GenerateSqlResponse,
    HealthResponse, InterpretResponse,
};

pub type AppState = Arc<AppContext>;

/// Wraps a failed pipeline run (as recorded on `PipelineState`, not a hard
/// `Err`) into the standard error envelope. The pipeline itself never
/// returns `Err` except for cancellation; every stage failure lands here.
fn pipeline_error_response(state: &PipelineState) -> Response {
    let body = ErrorResponse {
        error: state.error_message.clone().unwrap_or_else(|| "pipeline failed".to_string()),
        error_code: "PipelineError",
        stage: state.error_stage,
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

pub async fn generate_sql(
    State(ctx): State<AppState>,
    Json(req): Json<GenerateSqlRequest>,
) -> Result<Response> {
    let (session_id, session) = ctx.sessions.get_or_create(req.session_id);
    let history = {
        let guard = session.lock().await;
        guard.recent(crate::constants::SESSION_HISTORY_INJECTED)
    };

    let mut state = PipelineState::new(req.query.clone(), session_id.clone(), history);
    let deps = PipelineDeps {
        schema: &ctx.schema,
        db: ctx.db.as_ref(),
        llm: ctx.llm.as_ref(),
        embedding_client: ctx.embedding_client.as_ref(),
        embeddings: &ctx.embeddings,
        sql_cache: &ctx.sql_cache,
        db_timeout: DB_PREVIEW_TIMEOUT,
    };

    pipeline::generate_sql(&mut state, &deps, &tokio_util::sync::CancellationToken::new()).await?;

    if state.has_error() {
        return Ok(pipeline_error_response(&state));
    }

    ctx.sessions
        .record_exchange(
            &session_id,
            Exchange {
                user_message: req.query,
                generated_sql: state.generated_sql.clone(),
                timestamp: chrono::Utc::now(),
            },
        )
        .await;

    let query_id = uuid::Uuid::new_v4().to_string();
    ctx.sessions
        .store_query(
            &session_id,
            &query_id,
            QueryCacheEntry {
                sql: state.generated_sql.clone().unwrap_or_default(),
                original_query: state.rewritten_query.clone(),
                rows: Vec::new(),
                columns: Vec::new(),
                total_count: None,
                created_at: chrono::Utc::now(),
            },
        )
        .await;

    let intent = match state.intent {
        Intent::Sql => "sql",
        Intent::General => "general",
        Intent::Mixed => "mixed",
    };

    let schema_overview = matches!(state.intent, Intent::General).then(|| ctx.schema.overview());

    Ok(Json(GenerateSqlResponse {
        query_id,
        sql: state.generated_sql,
        intent,
        general_answer: state.general_answer,
        schema_overview,
    })
    .into_response())
}

pub async fn execute(
    State(ctx): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<ExecuteResponse>> {
    let entry = ctx
        .sessions
        .find_query(&query_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("unknown or expired query_id: {query_id}")))?;

    let entry = if entry.columns.is_empty() && entry.total_count.is_none() {
        let result = pipeline::executor::execute(ctx.db.as_ref(), &entry.sql, DB_PREVIEW_TIMEOUT).await?;
        let updated = QueryCacheEntry {
            sql: entry.sql,
            original_query: entry.original_query,
            rows: result.rows,
            columns: result.columns,
            total_count: Some(result.total_count),
            created_at: entry.created_at,
        };
        ctx.sessions.update_query(&query_id, updated.clone()).await;
        updated
    } else {
        entry
    };

    let truncated = is_truncated(entry.total_count, entry.rows.len());

    Ok(Json(ExecuteResponse {
        data: entry.rows.iter().map(|row| row.iter().map(value_to_json).collect()).collect(),
        columns: entry.columns.iter().map(|c| c.name.clone()).collect(),
        total_count: entry.total_count.unwrap_or(TotalCount::Exact(entry.rows.len())),
        truncated,
    }))
}

pub async fn interpret(
    State(ctx): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Json<InterpretResponse>> {
    let entry = ctx
        .sessions
        .find_query(&query_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("unknown or expired query_id: {query_id}")))?;

    if entry.columns.is_empty() && entry.total_count.is_none() {
        return Err(AppError::not_found(format!(
            "query_id {query_id} has not been executed yet"
        )));
    }

    let visualization = pipeline::interpreter::recommend_visualization(&entry.columns, &entry.rows);
    let interpretation = pipeline::interpreter::interpret(
        ctx.llm.as_ref(),
        &entry.original_query,
        &entry.columns,
        &entry.rows,
        entry.total_count,
    )
    .await?;

    let data_truncated = is_truncated(entry.total_count, entry.rows.len());

    Ok(Json(InterpretResponse {
        interpretation,
        visualization,
        data_truncated,
    }))
}

pub async fn download(
    State(ctx): State<AppState>,
    Path(query_id): Path<String>,
) -> Result<Response> {
    let entry = ctx
        .sessions
        .find_query(&query_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("unknown or expired query_id: {query_id}")))?;

    let (columns, row_stream) = ctx.db.execute_stream(&entry.sql, DB_STREAM_CHUNK_TIMEOUT).await?;
    let chunk_size = ctx.config.csv_chunk_size.max(1);
    let header: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let byte_stream = async_stream::try_stream! {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&header).map_err(|e| AppError::internal(format!("csv header write failed: {e}")))?;
        yield Bytes::from(writer.into_inner().map_err(|e| AppError::internal(e.to_string()))?);

        let mut rows = row_stream.chunks(chunk_size);
        while let Some(chunk) = rows.next().await {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
            for row in chunk {
                let row = row?;
                let fields: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
                writer.write_record(&fields).map_err(|e| AppError::internal(format!("csv row write failed: {e}")))?;
            }
            yield Bytes::from(writer.into_inner().map_err(|e| AppError::internal(e.to_string()))?);
        }
    };

    let body = axum::body::Body::from_stream(byte_stream);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/csv")
        .header("content-disposition", format!("attachment; filename=\"{query_id}.csv\""))
        .body(body)
        .map_err(|e| AppError::internal(e.to_string()))?)
}

pub async fn schema_overview(State(ctx): State<AppState>) -> impl IntoResponse {
    Json(ctx.schema.overview())
}

pub async fn feedback(
    State(ctx): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse> {
    if req.verdict == "down" {
        let entry = ctx
            .sessions
            .find_query(&req.query_id)
            .await
            .ok_or_else(|| AppError::not_found(format!("unknown or expired query_id: {}", req.query_id)))?;
        ctx.sql_cache.invalidate(&normalize_query(&entry.original_query)).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health(State(ctx): State<AppState>) -> impl IntoResponse {
    let cache_size = ctx.sql_cache.size().await.unwrap_or(-1);
    let database_connected = ctx.db.introspect().await.is_ok();
    Json(HealthResponse {
        status: if database_connected { "ok" } else { "degraded" },
        cache_size,
        database_connected,
        schema_id: ctx.schema.schema_id.clone(),
    })
}

/// True when the rows actually returned are fewer than what's really out
/// there: either the smart count gave up (`Unknown`, past its cap) or it
/// counted exactly and that count exceeds the preview we cached.
fn is_truncated(total_count: Option<TotalCount>, returned_rows: usize) -> bool {
    matches!(total_count, Some(TotalCount::Unknown))
        || matches!(total_count, Some(TotalCount::Exact(n)) if n > returned_rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_total_count_is_truncated() {
        assert!(is_truncated(Some(TotalCount::Unknown), 50));
    }

    #[test]
    fn exact_count_above_returned_rows_is_truncated() {
        assert!(is_truncated(Some(TotalCount::Exact(100)), 50));
    }

    #[test]
    fn exact_count_matching_returned_rows_is_not_truncated() {
        assert!(!is_truncated(Some(TotalCount::Exact(2)), 2));
    }

    #[test]
    fn missing_total_count_is_not_truncated() {
        assert!(!is_truncated(None, 2));
    }
}
