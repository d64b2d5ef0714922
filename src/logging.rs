//! Logging configuration for the service.
//!
//! A headless HTTP service has no terminal display to protect, so logs always
//! go to stderr (unlike a TUI application, which must route logs to a file).

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Honors `RUST_LOG` if set, otherwise defaults to `info`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
