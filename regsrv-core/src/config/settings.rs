//! Registry settings model
//!
//! This module defines the settings stored in config.toml.

use crate::models::CredentialPersistenceType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the registered servers tools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Local store location
    #[serde(default)]
    pub store: StoreSettings,
    /// Export defaults
    #[serde(default)]
    pub export: ExportSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Local store file settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Explicit store file; disables legacy promotion when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// File name of the store inside the settings folder
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Older file names in the same folder, newest first
    #[serde(default)]
    pub legacy_file_names: Vec<String>,
    /// Versioned folders searched for older stores, newest first
    #[serde(default = "default_legacy_versions")]
    pub legacy_versions: Vec<u32>,
}

fn default_file_name() -> String {
    "RegSrvr.xml".to_string()
}

fn default_legacy_versions() -> Vec<u32> {
    vec![140, 130, 120, 110, 100]
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            file: None,
            file_name: default_file_name(),
            legacy_file_names: Vec::new(),
            legacy_versions: default_legacy_versions(),
        }
    }
}

/// Export defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Credential policy applied when none is given on export
    #[serde(default)]
    pub credential_persistence: CredentialPersistenceType,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
