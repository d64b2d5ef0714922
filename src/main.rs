//! nlsql-chat — a natural-language-to-SQL conversational query service.

mod bootstrap;
mod cache;
mod config;
mod constants;
mod context;
mod db;
mod embeddings;
mod error;
mod http;
mod llm;
mod logging;
mod persistence;
mod pipeline;
mod safety;
mod schema;
mod session;

use config::AppConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    logging::init();

    if let Err(e) = run().await {
        error!(error_code = e.error_code(), "fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> error::Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| AppConfig::default_path());
    let config = AppConfig::load(&config_path)?;

    info!(bind_addr = %config.bind_addr, schema_id = %config.schema_id, "starting nlsql-chat");

    let bind_addr = config.bind_addr.clone();
    let ctx = bootstrap::bootstrap(config).await?;
    let app = http::router(std::sync::Arc::new(ctx));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::config(format!("failed to bind {bind_addr}: {e}")))?;

    info!(bind_addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| error::AppError::internal(format!("server error: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");

    // Hard cap on the graceful drain: axum's own graceful shutdown waits
    // indefinitely for in-flight requests, so force-exit if they overrun.
    tokio::spawn(async {
        tokio::time::sleep(constants::SHUTDOWN_GRACE_PERIOD).await;
        error!("graceful shutdown exceeded grace period, forcing exit");
        std::process::exit(1);
    });
}
