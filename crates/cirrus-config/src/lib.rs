pub mod error;
pub mod settings;

pub use error::*;
pub use settings::*;

use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "CIRRUS_CONFIG_PATH";
const CANDIDATES: [&str; 2] = ["cirrus.local.yaml", "cirrus.yaml"];

/// Returns `<config dir>/cirrus`, creating it when missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cirrus");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locates the settings file
///
/// Search order:
/// 1. `CIRRUS_CONFIG_PATH` environment variable
/// 2. current directory: cirrus.local.yaml, cirrus.yaml
/// 3. ~/.config/cirrus/cirrus.yaml
pub fn find_settings_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("cirrus").join("cirrus.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::SettingsFileNotFound)
}

/// Parses a settings file
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }

    serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidSettings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Finds and parses the settings file, falling back to defaults
pub fn load() -> Result<Settings> {
    match find_settings_file() {
        Ok(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            load_settings(path)
        }
        Err(ConfigError::SettingsFileNotFound) => {
            tracing::debug!("No settings file found, using defaults");
            Ok(Settings::default())
        }
        Err(e) => Err(e),
    }
}
