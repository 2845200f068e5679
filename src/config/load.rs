use std::fs;
use std::path::Path;

use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Load configuration from a toml file. Every section and field is
/// optional; absent values fall back to defaults.
pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    toml::from_str(&contents).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

pub fn load_from_str(contents: &str) -> Result<Config, ConfigError> {
    toml::from_str(contents).map_err(|err| ConfigError::Parse {
        path: "<inline>".to_string(),
        reason: err.to_string(),
    })
}
