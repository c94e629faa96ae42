//! Configuration manager for TOML file operations
//!
//! This module provides the `ConfigManager` which handles loading and saving
//! the registry settings file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

use super::paths::StorePaths;
use super::settings::RegistrySettings;

const CONFIG_FILE: &str = "config.toml";

/// Configuration manager for the registry tools
///
/// Settings are stored in `~/.config/regsrv/` by default.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Base directory for configuration files
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` with the default configuration directory
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration directory cannot be determined.
    pub fn new() -> ConfigResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ConfigError::NotFound(PathBuf::from("~/.config")))?
            .join("regsrv");
        Ok(Self { config_dir })
    }

    /// Creates a new `ConfigManager` with a custom configuration directory
    #[must_use]
    pub const fn with_config_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Returns the configuration directory path
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Ensures the configuration directory exists
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_config_dir(&self) -> ConfigResult<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).map_err(|e| {
                ConfigError::Write(format!(
                    "Failed to create config directory {}: {}",
                    self.config_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    // ========== Settings ==========

    /// Loads settings, returning defaults if the file doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or holds
    /// invalid values.
    pub fn load_settings(&self) -> ConfigResult<RegistrySettings> {
        let path = self.config_dir.join(CONFIG_FILE);
        let settings = Self::load_toml_file::<RegistrySettings>(&path)?;
        Self::validate_settings(&settings)?;
        Ok(settings)
    }

    /// Saves settings, creating the configuration directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or the file cannot be written.
    pub fn save_settings(&self, settings: &RegistrySettings) -> ConfigResult<()> {
        Self::validate_settings(settings)?;
        self.ensure_config_dir()?;
        let path = self.config_dir.join(CONFIG_FILE);
        Self::save_toml_file(&path, settings)
    }

    /// Resolves the store file locations for `settings`
    ///
    /// # Errors
    ///
    /// Returns an error if the user settings directory cannot be determined.
    pub fn store_paths(&self, settings: &RegistrySettings) -> ConfigResult<StorePaths> {
        StorePaths::from_settings(&settings.store)
    }

    // ========== Validation ==========

    /// Validates settings values
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate_settings(settings: &RegistrySettings) -> ConfigResult<()> {
        let file_name = settings.store.file_name.trim();
        if file_name.is_empty() {
            return Err(ConfigError::Validation {
                field: "store.file_name".to_string(),
                reason: "Store file name cannot be empty".to_string(),
            });
        }
        if file_name.contains(['/', '\\']) {
            return Err(ConfigError::Validation {
                field: "store.file_name".to_string(),
                reason: "Store file name must not contain a path separator".to_string(),
            });
        }
        if settings.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "logging.level".to_string(),
                reason: "Log level cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    // ========== Generic TOML Operations ==========

    /// Loads and parses a TOML file, returning default if it doesn't exist
    fn load_toml_file<T>(path: &Path) -> ConfigResult<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if !path.exists() {
            return Ok(T::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read {}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| {
            ConfigError::Deserialize(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Saves data to a TOML file
    fn save_toml_file<T>(path: &Path, data: &T) -> ConfigResult<()>
    where
        T: serde::Serialize,
    {
        let content = toml::to_string_pretty(data)
            .map_err(|e| ConfigError::Serialize(format!("Failed to serialize: {e}")))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::Write(format!("Failed to write {}: {}", path.display(), e)))
    }
}
