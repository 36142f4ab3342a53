//! Tracing setup helpers.
//!
//! The planner logs under per-subsystem targets (`tempo_core::engine`,
//! `tempo_db::timeline`, `tempo_solver::solver`, …). Nothing here is required
//! for operation; embedding applications usually install their own
//! subscriber.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber honoring `RUST_LOG`, defaulting to `warn`.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Test-friendly variant: compact output, no timestamps, never panics when a
/// subscriber is already installed.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .compact()
        .try_init();
}
