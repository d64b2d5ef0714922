//! HTTP/SSE surface (C14, §4.11/§6.3/§6.4).
//!
//! A thin axum router over the pipeline and context: REST handlers own the
//! generate/execute/interpret/download workflow, the SSE handler drives a
//! single chat turn end to end. Both share one `Arc<AppContext>` as state.

mod dto;
mod rest;
mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::constants::HTTP_REQUEST_TIMEOUT;
use crate::context::AppContext;

pub use rest::AppState;

/// Builds the full router for the service, wrapped in tracing, CORS, and a
/// request timeout (the SSE endpoint is exempt — see below).
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = build_cors(&ctx.config.cors_allowed_origins);

    let rest_routes = Router::new()
        .route("/api/generate-sql", post(rest::generate_sql))
        .route("/api/execute/:query_id", get(rest::execute))
        .route("/api/interpret/:query_id", post(rest::interpret))
        .route("/api/download/:query_id", get(rest::download))
        .route("/api/schema/overview", get(rest::schema_overview))
        .route("/api/feedback", post(rest::feedback))
        .route("/health", get(rest::health))
        .layer(TimeoutLayer::new(HTTP_REQUEST_TIMEOUT));

    // The SSE endpoint has no overall cap (§5): it keeps its own heartbeat
    // via `KeepAlive` instead of inheriting the blanket request timeout.
    let chat_route = Router::new().route("/chat", post(sse::chat));

    Router::new()
        .merge(rest_routes)
        .merge(chat_route)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    if allowed_origins.is_empty() {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
