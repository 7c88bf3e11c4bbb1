//! Tracing setup for the dedge-scan binary.
//!
//! Diagnostics go to stderr so that stdout carries only the status banners
//! and command results a CI log reader is looking for.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `level` for our crates, warnings
/// for dependencies.
pub fn default_filter(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!("warn,dedge_scan_core={level},dedge_scan={level}")
}

/// Install the global subscriber; later calls are no-ops.
///
/// `json` switches to newline-delimited JSON records.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
