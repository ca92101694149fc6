//! Tracing subscriber setup.
//!
//! The driver itself only emits `tracing` events: tx/rx lines at `debug`,
//! watcher and queue transitions at `trace`, port connect/disconnect at
//! `info`, dropped lines at `warn`. Applications that want them printed call
//! [`init`] once.
//!
//! # Example
//! ```no_run
//! use buildhat::config::ConfigLoader;
//! use buildhat::logging;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?.into_config();
//! logging::init(&config.logging)?;
//! # Ok(())
//! # }
//! ```

use crate::config::{ConfigError, ConfigResult, LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter: `RUST_LOG` when set, the configured level otherwise.
pub fn filter(config: &LoggingConfig) -> ConfigResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::validation("logging.level", e.to_string()))
}

/// Install a global fmt subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed, which
/// makes this safe to call from tests and from several components.
pub fn init(config: &LoggingConfig) -> ConfigResult<bool> {
    let env_filter = filter(config)?;

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    Ok(tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .is_ok())
}
