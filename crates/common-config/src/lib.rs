//! Shared configuration helpers for messaging services.
//!
//! A service describes its settings as a `#[serde(default)]` struct
//! implementing [`ServiceConfig`]. [`load`] starts from the YAML file named by
//! `{PREFIX}CONFIG` (or from `Default` when the variable is unset) and then
//! lets the service apply `{PREFIX}*` environment overrides.

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of a single service.
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Prefix of every environment variable read for this service.
    const PREFIX: &'static str;

    fn apply_environment_overrides(&mut self, _prefix: &str) {}

    /// Checked once the file and environment overrides have been applied.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Load the configuration for `T` from its config file and the environment.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    let path = env::var_os(format!("{}CONFIG", T::PREFIX)).map(PathBuf::from);
    load_from(path.as_deref())
}

/// Load the configuration for `T` from an explicit file, then apply
/// environment overrides.
pub fn load_from<T: ServiceConfig>(path: Option<&Path>) -> Result<T, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "loading config file");
            parse::<T>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => T::default(),
    };
    config.apply_environment_overrides(T::PREFIX);
    config.validate()?;
    Ok(config)
}

fn parse<T: ServiceConfig>(contents: &str) -> Result<T, serde_yaml::Error> {
    // An empty document deserializes as unit, not as an empty mapping.
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(contents)
}

/// Parse the environment variable `var`, if set.
///
/// Unparsable values are logged and ignored so a typo falls back to the
/// configured value instead of aborting startup.
pub fn env_override<T>(var: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = env::var(var).ok()?;
    value
        .parse::<T>()
        .inspect_err(|error| {
            tracing::warn!(%var, %value, %error, "invalid environment override, ignoring");
        })
        .ok()
}
