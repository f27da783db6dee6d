//! Configuration loading and environment overrides

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config = load_config_str(&contents)?;

    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Parse and validate configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(contents: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration with environment variable overrides applied
///
/// Recognized variables:
/// - `FLOWGATE_LOG_LEVEL`: overrides `log.level`
/// - `FLOWGATE_CONTROL_LISTEN`: overrides `control.listen`
/// - `FLOWGATE_OVERLORD_THREADS`: overrides `overlord_threads`
///
/// # Errors
///
/// Returns `ConfigError` if loading fails or an override does not parse.
pub fn load_config_with_env(path: &Path) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(level) = std::env::var("FLOWGATE_LOG_LEVEL") {
        debug!(level = %level, "Overriding log level from environment");
        config.log.level = level;
    }

    if let Ok(listen) = std::env::var("FLOWGATE_CONTROL_LISTEN") {
        config.control.listen = listen.parse().map_err(|_| ConfigError::EnvError {
            name: "FLOWGATE_CONTROL_LISTEN".into(),
            reason: format!("'{listen}' is not a valid socket address"),
        })?;
    }

    if let Ok(threads) = std::env::var("FLOWGATE_OVERLORD_THREADS") {
        config.overlord_threads = threads.parse().map_err(|_| ConfigError::EnvError {
            name: "FLOWGATE_OVERLORD_THREADS".into(),
            reason: format!("'{threads}' is not a valid thread count"),
        })?;
    }

    config.validate()?;
    Ok(config)
}

/// Write a default configuration file
///
/// # Errors
///
/// Returns `ConfigError` if serialization or the write fails.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "Default configuration written");
    Ok(())
}
