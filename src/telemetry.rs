//! Tracing subscriber setup.
//!
//! Binaries and tests call [`init`] once at startup; the library itself
//! only emits spans and events. Filtering follows `RUST_LOG`, defaulting
//! to `info`.

use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: env-filtered fmt output plus an
/// [`ErrorLayer`] so span traces attach to captured errors.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}
