//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::CacheConfig;
use std::path::{is_separator, Path};

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "memo.toml";

/// Loads and validates a `memo.toml` configuration from a project directory.
///
/// Reads `<project_dir>/memo.toml`, parses it, and validates required fields.
/// The returned root is left as written; use
/// [`CacheConfig::resolved_root`] to anchor a relative root.
pub fn load_config(project_dir: &Path) -> Result<CacheConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates a `memo.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let config: CacheConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are usable by the store.
fn validate_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.cache.root.as_os_str().is_empty() {
        return Err(ConfigError::MissingField {
            field: "cache.root",
        });
    }
    let prefix = &config.cache.temp_prefix;
    if prefix.is_empty() {
        return Err(ConfigError::MissingField {
            field: "cache.temp_prefix",
        });
    }
    if prefix.chars().any(is_separator) {
        return Err(ConfigError::InvalidValue {
            field: "cache.temp_prefix",
            reason: format!("'{prefix}' must not contain a path separator"),
        });
    }
    for (field, mode) in [
        ("cache.dir_mode", config.cache.dir_mode),
        ("cache.blob_mode", config.cache.blob_mode),
    ] {
        if mode > 0o7777 {
            return Err(ConfigError::InvalidValue {
                field,
                reason: format!("{mode:o} does not fit in 0o7777"),
            });
        }
    }
    if config.cache.dir_mode & 0o700 != 0o700 {
        return Err(ConfigError::InvalidValue {
            field: "cache.dir_mode",
            reason: format!("{:o} must grant the owner rwx", config.cache.dir_mode),
        });
    }
    if config.cache.blob_mode & 0o222 != 0 {
        return Err(ConfigError::InvalidValue {
            field: "cache.blob_mode",
            reason: format!("{:o} must not grant write access", config.cache.blob_mode),
        });
    }
    Ok(())
}
