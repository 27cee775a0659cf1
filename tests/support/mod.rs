//! Shared setup for integration tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a minimal `tracing` subscriber the first time it's called in a
/// test binary, so a failing assertion's surrounding log lines (host
/// transitions, mode changes, recreation attempts) show up instead of being
/// dropped.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
            .with_test_writer()
            .try_init();
    });
}
