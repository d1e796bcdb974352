//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Targets and thread ids on every line, since fence waits block the
///   render thread and it helps to see which thread stalled
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
///
/// # Example
/// ```
/// framesync_core::init_logging();
/// tracing::info!("Frame sync initialized");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,framesync=debug,framesync_renderer=debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
