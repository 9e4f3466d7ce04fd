//! Logging utilities for OPAL
//!
//! Thin helpers around `tracing-subscriber`, gated behind the `logging`
//! feature so the core stays dependency-light for embedders that bring
//! their own subscriber.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging with default settings.
///
/// `RUST_LOG` takes precedence over the built-in "info" level.
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Initialize logging with a specific base level (trace, debug, info, warn, error).
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

/// Initialize logging for tests — captured by the test harness, safe to call
/// more than once.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("opal_core=debug"))
        .with_test_writer()
        .try_init();
}

// Stub implementations when the logging feature is disabled
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
