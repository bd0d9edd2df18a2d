//! Development-time tracing for debugging diagnosis runs.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Reports and run
//! artifacts (`io/run_log`) are product output and never go through it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=diagnose=debug diagnose run --playbook redis.yaml --tools tools.yaml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
