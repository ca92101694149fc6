//! Driver configuration: a TOML file plus `BUILDHAT_*` environment overrides.
//!
//! The file is looked up at `$BUILDHAT_CONFIG`, then `./buildhat.toml`, then
//! the platform config directory (`~/.config/buildhat/` on Linux). Without a
//! file every section takes its defaults. Overrides are named
//! `BUILDHAT_<SECTION>_<KEY>`, e.g. `BUILDHAT_SERIAL_DEVICE=/dev/ttyAMA0` or
//! `BUILDHAT_LINK_RESPONSE_TIMEOUT_MS=2000`.
//!
//! ```toml
//! [serial]
//! device = "/dev/serial0"
//! baud_rate = 115200
//!
//! [link]
//! response_timeout_ms = 2000
//!
//! [logging]
//! level = "buildhat=debug"
//! format = "compact"
//! ```
//!
//! ```rust,no_run
//! use buildhat::config::ConfigLoader;
//!
//! # fn main() -> Result<(), buildhat::config::ConfigError> {
//! let config = ConfigLoader::load()?.into_config();
//! println!("{} @ {}", config.serial.device, config.serial.baud_rate);
//! # Ok(())
//! # }
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, LinkConfig, LogFormat, LoggingConfig, SerialConfig, TelemetryConfig,
};
