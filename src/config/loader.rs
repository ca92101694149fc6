//! Locating, reading and writing `buildhat.toml`, plus `BUILDHAT_*`
//! environment overrides.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const ENV_PREFIX: &str = "BUILDHAT";
const CONFIG_FILE_NAME: &str = "buildhat.toml";
/// Explicit config file path; takes precedence over discovery.
const CONFIG_PATH_ENV: &str = "BUILDHAT_CONFIG";

/// A [`Config`] together with the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub config_path: Option<PathBuf>,
    pub config: Config,
}

impl ConfigLoader {
    /// Discover a config file (see [`resolve_config_path`]), apply
    /// environment overrides and validate. No file means defaults.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();
        let config = match &config_path {
            Some(path) => read_config(path)?,
            None => Config::default(),
        };
        Self::finish(config_path, config)
    }

    /// Like [`ConfigLoader::load`], from a given file.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let config = read_config(&path)?;
        Self::finish(Some(path), config)
    }

    fn finish(config_path: Option<PathBuf>, mut config: Config) -> ConfigResult<Self> {
        apply_env_overrides(&mut config)?;
        config.validate()?;
        if let Some(path) = &config_path {
            info!(path = %path.display(), "configuration loaded");
        }
        Ok(Self { config_path, config })
    }

    /// Defaults plus environment overrides, without touching the filesystem.
    ///
    /// Malformed overrides are skipped rather than reported.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(e) = apply_env_overrides(&mut config) {
            debug!("Ignoring environment override: {}", e);
        }
        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write back to the file this was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_deref().ok_or(ConfigError::NoPath)?;
        write_config(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        write_config(&self.config, path.as_ref())
    }

    /// Re-read the source file. A loader without one is left unchanged.
    pub fn reload(&mut self) -> ConfigResult<()> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        *self = Self::load_from(path)?;
        Ok(())
    }
}

/// First existing file among `$BUILDHAT_CONFIG`, `./buildhat.toml` and the
/// platform config directory.
pub fn resolve_config_path() -> Option<PathBuf> {
    let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let local = Some(PathBuf::from(CONFIG_FILE_NAME));
    [explicit, local, get_default_config_path()]
        .into_iter()
        .flatten()
        .find(|path| path.is_file())
}

/// Platform config directory, e.g. `~/.config/buildhat` on Linux.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "buildhat").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

fn read_config(path: &Path) -> ConfigResult<Config> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

fn write_config(config: &Config, path: &Path) -> ConfigResult<()> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).map_err(write_err)
}

/// Value of `BUILDHAT_<key>`, paired with the full variable name.
fn env_value(key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{key}");
    std::env::var(&var).ok().map(|value| (var, value))
}

fn override_parsed<T: FromStr>(slot: &mut T, key: &str, what: &str) -> ConfigResult<()> {
    if let Some((var, value)) = env_value(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::env_parse(var, format!("expected {what}")))?;
    }
    Ok(())
}

fn override_string(slot: &mut String, key: &str) {
    if let Some((_, value)) = env_value(key) {
        *slot = value;
    }
}

/// Apply `BUILDHAT_<SECTION>_<KEY>` overrides, e.g.
/// `BUILDHAT_SERIAL_DEVICE=/dev/ttyAMA0` or `BUILDHAT_LOGGING_FORMAT=json`.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    override_string(&mut config.serial.device, "SERIAL_DEVICE");
    override_parsed(&mut config.serial.baud_rate, "SERIAL_BAUD_RATE", "a baud rate")?;
    override_parsed(&mut config.serial.timeout_ms, "SERIAL_TIMEOUT_MS", "milliseconds")?;
    override_parsed(&mut config.serial.exclusive, "SERIAL_EXCLUSIVE", "true or false")?;

    // An empty value clears the timeout.
    if let Some((var, value)) = env_value("LINK_RESPONSE_TIMEOUT_MS") {
        config.link.response_timeout_ms = match value.trim() {
            "" => None,
            ms => Some(
                ms.parse()
                    .map_err(|_| ConfigError::env_parse(var, "expected milliseconds"))?,
            ),
        };
    }
    override_string(&mut config.link.list_terminator, "LINK_LIST_TERMINATOR");

    override_parsed(
        &mut config.telemetry.default_wiggle,
        "TELEMETRY_DEFAULT_WIGGLE",
        "a number",
    )?;

    override_string(&mut config.logging.level, "LOGGING_LEVEL");
    if let Some((var, value)) = env_value("LOGGING_FORMAT") {
        config.logging.format = match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => return Err(ConfigError::env_parse(var, "expected json, pretty or compact")),
        };
    }
    Ok(())
}
