//! Local store file locations and promotion of older files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::document::{parse_document, Document};
use crate::error::{ConfigError, ConfigResult};

use super::settings::StoreSettings;

const SETTINGS_FOLDER: [&str; 2] = ["Microsoft", "SQL Server Management Studio"];
const LEGACY_FILE_NAME: &str = "RegSrvr.xml";

/// Where the local store lives and where older copies may be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    current: PathBuf,
    legacy: Vec<PathBuf>,
}

impl StorePaths {
    /// Resolves paths under the user's settings directory
    ///
    /// An explicit `file` in the settings is used as-is with no legacy
    /// candidates.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings directory cannot be determined.
    pub fn from_settings(settings: &StoreSettings) -> ConfigResult<Self> {
        if let Some(file) = &settings.file {
            return Ok(Self::with_file(file.clone()));
        }
        let base = dirs::config_dir().ok_or_else(|| ConfigError::NotFound(PathBuf::from("~/.config")))?;
        Ok(Self::under(&base, settings))
    }

    /// Resolves paths under `base` in place of the user's settings directory
    #[must_use]
    pub fn under(base: &Path, settings: &StoreSettings) -> Self {
        let folder = SETTINGS_FOLDER.iter().fold(base.to_path_buf(), |p, s| p.join(s));
        let current = folder.join(&settings.file_name);

        let mut legacy: Vec<PathBuf> = settings
            .legacy_file_names
            .iter()
            .map(|name| folder.join(name))
            .collect();
        legacy.extend(settings.legacy_versions.iter().map(|version| {
            base.join("Microsoft")
                .join("Microsoft SQL Server")
                .join(version.to_string())
                .join("Tools")
                .join("Shell")
                .join(LEGACY_FILE_NAME)
        }));
        legacy.retain(|path| *path != current);

        Self { current, legacy }
    }

    /// Uses `file` with no legacy candidates
    #[must_use]
    pub fn with_file(file: PathBuf) -> Self {
        Self {
            current: file,
            legacy: Vec::new(),
        }
    }

    /// Returns the current store file
    #[must_use]
    pub fn current(&self) -> &Path {
        &self.current
    }

    /// Returns the older locations in search order
    #[must_use]
    pub fn legacy(&self) -> &[PathBuf] {
        &self.legacy
    }

    /// Copies the first readable older store to the current location
    ///
    /// Does nothing when the current file exists. Candidates that are missing
    /// or do not hold a store document are skipped. A failed copy stops the
    /// search. Returns the promoted file.
    pub fn promote_legacy_file(&self) -> Option<PathBuf> {
        if self.current.exists() {
            return None;
        }
        let candidate = self.legacy.iter().find(|path| is_store_file(path))?;

        let copied = self
            .current
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(candidate, &self.current));
        match copied {
            Ok(_) => {
                tracing::info!(
                    from = %candidate.display(),
                    to = %self.current.display(),
                    "Promoted registered servers file from an older version"
                );
                Some(candidate.clone())
            }
            Err(e) => {
                tracing::warn!(
                    from = %candidate.display(),
                    error = %e,
                    "Failed to copy older registered servers file"
                );
                None
            }
        }
    }
}

fn is_store_file(path: &Path) -> bool {
    let Ok(text) = fs::read_to_string(path) else {
        return false;
    };
    match parse_document(&text) {
        Ok(Document::Store(_)) => true,
        Ok(_) => false,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable older store");
            false
        }
    }
}
