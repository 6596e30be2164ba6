//! Telemetry initialization.
//!
//! Logs go to stderr so the mirrored cvs output on stdout stays clean for
//! the CI server to capture. Controlled by `CVSSYNC_LOG_FORMAT`:
//! - unset or `"plain"` → human-readable output
//! - `"json"` → JSON events, one per line
//!
//! Filtering uses the standard `RUST_LOG` env var, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. Call once from `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CVSSYNC_LOG_FORMAT").is_ok_and(|v| v == "json");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
