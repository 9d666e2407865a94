use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a test-friendly `tracing` subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`, and writes through the test
/// harness's captured output. Safe to call from every test: only the first
/// call in a process installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_test_writer()
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
