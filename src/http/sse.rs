//! `POST /chat` SSE endpoint (§6.4): one writer task per connection streams
//! `session` → `sql`? → `data`? → `analysis` → `done`, with axum's built-in
//! keep-alive comment lines standing in for a manual heartbeat task.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants::{DB_CHAT_EXECUTE_TIMEOUT, SESSION_HISTORY_INJECTED, SSE_KEEPALIVE_INTERVAL};
use crate::pipeline::{self, Intent, PipelineDeps, PipelineState};
use crate::session::Exchange;

use super::dto::{value_to_json, AnalysisEvent, ChatRequest, DataEvent, SessionEvent, SqlEvent};
use super::rest::AppState;

pub async fn chat(
    State(ctx): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel::<Event>(16);

    tokio::spawn(async move {
        run_chat_turn(ctx, req, &tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE_INTERVAL).text("keep-alive"))
}

async fn send(tx: &mpsc::Sender<Event>, name: &'static str, payload: impl serde::Serialize) {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => {
            let _ = tx.send(event).await;
        }
        Err(e) => tracing::warn!("failed to encode SSE event {name}: {e}"),
    }
}

async fn run_chat_turn(ctx: AppState, req: ChatRequest, tx: &mpsc::Sender<Event>) {
    let (session_id, session) = ctx.sessions.get_or_create(req.session_id);
    send(tx, "session", SessionEvent { session_id: session_id.clone() }).await;

    let history = {
        let guard = session.lock().await;
        guard.recent(SESSION_HISTORY_INJECTED)
    };

    let mut state = PipelineState::new(req.message.clone(), session_id.clone(), history);
    let deps = PipelineDeps {
        schema: &ctx.schema,
        db: ctx.db.as_ref(),
        llm: ctx.llm.as_ref(),
        embedding_client: ctx.embedding_client.as_ref(),
        embeddings: &ctx.embeddings,
        sql_cache: &ctx.sql_cache,
        db_timeout: DB_CHAT_EXECUTE_TIMEOUT,
    };

    let outcome = pipeline::run(&mut state, &deps, &CancellationToken::new()).await;

    match outcome {
        Err(e) => {
            send(tx, "error", crate::error::ErrorResponse::from(&e)).await;
        }
        Ok(()) => {
            if state.has_error() {
                let body = crate::error::ErrorResponse {
                    error: state.error_message.clone().unwrap_or_else(|| "pipeline failed".to_string()),
                    error_code: "PipelineError",
                    stage: state.error_stage,
                };
                send(tx, "error", body).await;
            } else {
                if !matches!(state.intent, Intent::General) {
                    if let Some(sql) = &state.generated_sql {
                        send(tx, "sql", SqlEvent { sql: sql.clone() }).await;
                    }

                    let total_count = state.total_count_hint.unwrap_or(crate::db::TotalCount::Exact(state.rows.len()));
                    let truncated = matches!(total_count, crate::db::TotalCount::Unknown)
                        || matches!(total_count, crate::db::TotalCount::Exact(n) if n > state.rows.len());

                    send(
                        tx,
                        "data",
                        DataEvent {
                            columns: state.columns.iter().map(|c| c.name.clone()).collect(),
                            data: state.rows.iter().map(|row| row.iter().map(value_to_json).collect()).collect(),
                            total_count,
                            truncated,
                        },
                    )
                    .await;
                }

                let interpretation = state.interpretation.clone().or_else(|| state.general_answer.clone()).unwrap_or_default();
                send(
                    tx,
                    "analysis",
                    AnalysisEvent {
                        interpretation,
                        visualization: state.visualization.clone(),
                    },
                )
                .await;

                ctx.sessions
                    .record_exchange(
                        &session_id,
                        Exchange {
                            user_message: req.message,
                            generated_sql: state.generated_sql.clone(),
                            timestamp: chrono::Utc::now(),
                        },
                    )
                    .await;
            }
        }
    }

    send(tx, "done", serde_json::json!({})).await;
}
