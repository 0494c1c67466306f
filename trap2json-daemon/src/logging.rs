//! Logging initialization for trap2json.
//!
//! Configures `tracing-subscriber` from the `logger` section of the
//! configuration. Supports a plain console format and JSON lines.
//! `RUST_LOG` takes precedence over the configured level.

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use trap2json_core::config::{LogFormat, LoggerConfig};

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
pub fn init_tracing(config: &LoggerConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))?;
        }
        LogFormat::Console => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(false))
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))?;
        }
    }

    Ok(())
}
