//! Logging setup
//!
//! Human readable `tracing` output on stderr, filtered by `RUST_LOG`
//! (default `info`). Stdout is reserved for command output such as plans.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{DeployError, Result};

/// Install the global subscriber. Fails if one is already installed.
pub fn init() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|e| DeployError::config(format!("Failed to initialize tracing: {}", e)))
}
