//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directives used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,blackhole=debug,gpu_allocator=warn";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (`RUST_LOG`), falling back to
///   `info,blackhole=debug,gpu_allocator=warn`
/// - A formatting layer with targets and thread ids
///
/// Calling this more than once is harmless; later calls are ignored.
///
/// # Example
/// ```
/// blackhole_core::init_logging();
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
