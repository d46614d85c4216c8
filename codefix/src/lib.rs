// codefix: local file-access daemon for browser and IDE coding agents
// The `session` module holds the core state machines; `server` is the HTTP surface.

pub mod server;
pub mod session;

// Polling helpers for async tests (unit tests, or downstream with `test-utils`)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Install the stderr tracing subscriber used by both binaries
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
