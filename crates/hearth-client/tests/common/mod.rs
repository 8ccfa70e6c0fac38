//! Shared test setup.

use tracing_subscriber::EnvFilter;

/// Install a subscriber honoring `RUST_LOG` that writes through the test
/// harness. Safe to call from every test; only the first call wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_ansi(false)
        .try_init();
}
