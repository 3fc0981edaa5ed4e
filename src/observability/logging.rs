//! Structured logging setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Default log directive applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "backend_gateway=info";

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG` when present. Returns quietly if a subscriber is already
/// installed, so tests and embedding applications can call it freely.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
}
