//! Config file discovery, loading, and default-file generation.

use std::path::{Path, PathBuf};

use log::info;

use crate::config::{Config, ConfigError};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "imagescout.toml";

/// Resolves which config file (if any) should be loaded.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let implicit = PathBuf::from(DEFAULT_CONFIG_FILE_NAME);
    implicit.is_file().then_some(implicit)
}

pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Loads the resolved config file, or the built-in defaults when there is none.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match resolve_config_path(explicit) {
        Some(path) => {
            info!("Loading config. path={}", path.display());
            load_config_file(&path)
        }
        None => {
            info!("No config file found. Using built-in defaults");
            Ok(Config::default())
        }
    }
}

pub fn serialize_config(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string(config)?)
}

pub fn write_config_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let text = serialize_config(config)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.display().to_string(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
