//! Tracing subscriber setup for the edge and server processes

use tracing_subscriber::EnvFilter;

/// Install a formatted tracing subscriber.
///
/// `RUST_LOG` takes precedence; `default_directive` (for example `"rovelink=info"`)
/// applies when it is unset or invalid. Calling this more than once is harmless.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
