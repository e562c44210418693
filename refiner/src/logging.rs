//! Diagnostic tracing for the refiner.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate from
//! the product artifacts in `.refiner/` (session record, prompt log), which are
//! always written.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` so loop progress is visible.
///
/// # Example
/// ```bash
/// RUST_LOG=refiner=debug refiner run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
