//! Startup sequence (C15, §4.12).
//!
//! Ordered, synchronous-in-spirit bootstrap: load the canonical schema,
//! connect to the live database and check it for drift, open the embedding
//! store/SQL cache/session store, warm up the LLM and embedding clients, then
//! hand back a ready [`AppContext`] for the HTTP layer to serve behind.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::error::{AppError, Result};
use crate::llm::Message;
use crate::session::spawn_sweeper;

/// Runs the full startup sequence and returns a ready context.
///
/// Schema drift is fatal: any table or column the canonical schema declares
/// but the live database lacks aborts startup. The reverse (the live
/// database has extra tables/columns) is fine — the canonical schema is
/// intentionally a curated subset.
pub async fn bootstrap(config: AppConfig) -> Result<AppContext> {
    let ctx = AppContext::build(config).await?;

    check_schema_drift(&ctx).await?;
    spawn_sweeper(ctx.sessions.clone());
    warmup(&ctx).await;

    info!(
        schema_id = %ctx.schema.schema_id,
        tables = ctx.schema.tables.len(),
        "bootstrap complete"
    );

    Ok(ctx)
}

async fn check_schema_drift(ctx: &AppContext) -> Result<()> {
    let introspection = ctx.db.introspect().await?;

    for (table_name, table_def) in &ctx.schema.tables {
        let live_columns = introspection.tables.get(table_name).ok_or_else(|| {
            AppError::schema_drift(format!("table `{table_name}` is declared in the canonical schema but absent from the live database"))
        })?;

        for column in table_def.columns_ordered() {
            if !live_columns.contains(&column.name) {
                return Err(AppError::schema_drift(format!(
                    "column `{table_name}.{}` is declared in the canonical schema but absent from the live database",
                    column.name
                )));
            }
        }
    }

    Ok(())
}

/// Best-effort warmup: a 1-token LLM call and a short embedding call, to pay
/// cold-start connection/TLS costs before the first user request arrives.
/// Failures are logged, never fatal.
async fn warmup(ctx: &AppContext) {
    let start = Instant::now();
    match ctx.llm.complete(&[Message::user("Reply with OK.".to_string())]).await {
        Ok(_) => info!(elapsed_ms = start.elapsed().as_millis(), "LLM warmup ok"),
        Err(e) => warn!("LLM warmup failed (non-fatal): {e}"),
    }

    let start = Instant::now();
    match ctx.embedding_client.embed("warmup").await {
        Ok(_) => info!(elapsed_ms = start.elapsed().as_millis(), "embedding warmup ok"),
        Err(e) => warn!("embedding warmup failed (non-fatal): {e}"),
    }
}
