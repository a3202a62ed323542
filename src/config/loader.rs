use figment::providers::{Env, Format, Json, Toml};
use figment::Figment;
use std::path::Path;

use super::schema::HostConfig;
use crate::error::{ConfigError, Result};

/// Loads host configuration from `capsock.toml`/`capsock.json` in the
/// working directory, overridden by `CAPSOCK_`-prefixed environment
/// variables (`CAPSOCK_SOCKETS_FOLDER` moves the socket folder off its
/// `/var/run` default).
pub fn load() -> Result<HostConfig> {
    let config: HostConfig = Figment::new()
        .merge(Toml::file("capsock.toml"))
        .merge(Json::file("capsock.json"))
        .merge(Env::prefixed("CAPSOCK_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

/// Loads host configuration from an explicit file path plus the same
/// environment overrides.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml or .json".into(),
            )
            .into())
        }
    };

    let config: HostConfig = figment
        .merge(Env::prefixed("CAPSOCK_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &HostConfig) -> Result<()> {
    if config.sockets_folder.as_os_str().is_empty() {
        return Err(ConfigError::Validation("Sockets folder must not be empty".into()).into());
    }

    if config.dial_timeout_ms == 0 {
        return Err(ConfigError::Validation("Dial timeout must be greater than 0".into()).into());
    }

    for spec in &config.components {
        if spec.name.is_empty() {
            return Err(
                ConfigError::Validation(format!("Component of kind '{}' has an empty name", spec.kind)).into(),
            );
        }
        if spec.version.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Component '{}' has an empty version",
                spec.name
            ))
            .into());
        }
    }

    Ok(())
}
