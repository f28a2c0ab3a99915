//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Targets and thread ids, which matter here because GPU queue
///   workers of the host device log from their own threads
///
/// Calling it more than once is harmless; only the first call installs
/// the subscriber.
///
/// # Example
/// ```
/// samples_core::init_logging();
/// tracing::info!("Sample started");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,samples=debug,winit=warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
