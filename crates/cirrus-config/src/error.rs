use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Settings file not found. Looked in:\n\
        - CIRRUS_CONFIG_PATH environment variable\n\
        - current directory: cirrus.local.yaml, cirrus.yaml\n\
        - ~/.config/cirrus/cirrus.yaml"
    )]
    SettingsFileNotFound,

    #[error("Invalid settings in {path}: {message}")]
    InvalidSettings { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
