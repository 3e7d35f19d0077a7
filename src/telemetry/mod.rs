//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; embedding applications
//! normally install their own subscriber. `init_telemetry` is provided for
//! binaries and examples that want the same defaults the service uses:
//! env-filter driven levels with either human-readable or JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Levels come from `RUST_LOG` (default `info`). Set `json` for structured
/// log output suitable for collectors.
pub fn init_telemetry(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(json_output = json, "Telemetry initialized");
}
