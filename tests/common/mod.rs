// tests/common/mod.rs

//! Shared test support: a scripted fake cluster node speaking just enough
//! RESP2 to drive the dispatcher's retry/refresh state machine end-to-end
//! over a real loopback socket.

pub mod mock_node;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs a test-scoped `tracing` subscriber so dispatcher/monitor events
/// show up under `cargo test -- --nocapture`, the same `try_init` + test
/// writer pattern the teacher uses in its own integration test harness.
/// Safe to call from every test: `try_init` silently no-ops after the first.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
