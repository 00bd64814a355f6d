//! Subscriber setup for binaries and tests that want log output.

#[cfg(feature = "tracing-basic")]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized");
    }
}

/// No-op when the `tracing-basic` feature is disabled
#[cfg(not(feature = "tracing-basic"))]
pub fn init_tracing(_json: bool) {}
