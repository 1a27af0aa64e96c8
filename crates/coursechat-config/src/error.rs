use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format for {0} (expected .yml, .yaml or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
