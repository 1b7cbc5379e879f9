//! Configuration loading for the veneer CLI
//!
//! The proxy configuration comes from the first of:
//! - the `--config` flag
//! - the `VENEER_CONFIG` environment variable (absolute path)
//! - `~/.config/veneer/config.json` when it exists
//! - built-in defaults

use std::fmt;
use std::path::{Path, PathBuf};
use veneer::{ProxyConfig, Result, VeneerError};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "VENEER_CONFIG";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    Env(PathBuf),
    User(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Flag(path) => write!(f, "{} (--config)", path.display()),
            ConfigSource::Env(path) => write!(f, "{} ({})", path.display(), CONFIG_ENV),
            ConfigSource::User(path) => write!(f, "{} (user config)", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

/// The effective configuration and its origin.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ProxyConfig,
    pub source: ConfigSource,
}

/// Path of the user-level configuration file.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("veneer").join("config.json"))
}

/// Load the effective configuration.
pub fn load(flag: Option<&Path>) -> Result<LoadedConfig> {
    let env_value = std::env::var(CONFIG_ENV).ok();
    let source = select_source(flag, env_value.as_deref(), user_config_path())?;
    load_from(source)
}

/// Pick the configuration source by precedence.
///
/// An environment path must be absolute. The user config file is only
/// selected when it exists; flag and environment paths are taken as given
/// and fail later if unreadable.
fn select_source(
    flag: Option<&Path>,
    env_value: Option<&str>,
    user_path: Option<PathBuf>,
) -> Result<ConfigSource> {
    if let Some(path) = flag {
        return Ok(ConfigSource::Flag(path.to_path_buf()));
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        let path = PathBuf::from(value);
        if !path.is_absolute() {
            return Err(VeneerError::Config(format!(
                "{} must be an absolute path, got: {}",
                CONFIG_ENV, value
            )));
        }
        return Ok(ConfigSource::Env(path));
    }
    match user_path {
        Some(path) if path.is_file() => Ok(ConfigSource::User(path)),
        _ => Ok(ConfigSource::Defaults),
    }
}

fn load_from(source: ConfigSource) -> Result<LoadedConfig> {
    let config = match source {
        ConfigSource::Flag(ref path) | ConfigSource::Env(ref path) | ConfigSource::User(ref path) => {
            read_config_file(path)?
        }
        ConfigSource::Defaults => ProxyConfig::default(),
    };
    Ok(LoadedConfig { config, source })
}

fn read_config_file(path: &Path) -> Result<ProxyConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        VeneerError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    ProxyConfig::from_json(&text)
}
