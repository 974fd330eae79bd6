//! Tracing bootstrap for the service binary.

use tracing_subscriber::filter::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise debug mode lifts the default level so
/// per-request timing lines become visible.
pub(crate) fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
