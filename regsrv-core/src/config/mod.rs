//! Configuration management for the registry tools
//!
//! This module provides the `ConfigManager` for loading and saving settings
//! in TOML format, and `StorePaths` for locating the local store file.

mod manager;
mod paths;
pub mod settings;

pub use manager::ConfigManager;
pub use paths::StorePaths;
pub use settings::{ExportSettings, LoggingSettings, RegistrySettings, StoreSettings};
