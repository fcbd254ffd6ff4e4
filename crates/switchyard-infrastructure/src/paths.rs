//! Path management for switchyard configuration and local data.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/switchyard/        # Config directory
//! └── switchyard.toml          # Coordination core configuration
//!
//! ~/.local/share/switchyard/   # Data directory
//! └── state/                   # DirDurableStore root (one dir per collection)
//! ```

use std::path::PathBuf;
use thiserror::Error;

const APP_NAME: &str = "switchyard";

#[derive(Debug, Error)]
pub enum PathError {
    /// Home directory could not be determined.
    #[error("Cannot find home directory")]
    HomeDirNotFound,
}

/// Resolves switchyard paths, either under the platform directories or under an
/// explicit base directory.
#[derive(Debug, Clone, Default)]
pub struct SwitchyardPaths {
    base: Option<PathBuf>,
}

impl SwitchyardPaths {
    /// Paths under the platform config/data directories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths rooted at `base`: config in `base/config`, data in `base/data`.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    /// Returns the configuration directory (e.g. `~/.config/switchyard/`).
    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        match &self.base {
            Some(base) => Ok(base.join("config")),
            None => dirs::config_dir()
                .map(|d| d.join(APP_NAME))
                .ok_or(PathError::HomeDirNotFound),
        }
    }

    /// Returns the data directory (e.g. `~/.local/share/switchyard/`).
    pub fn data_dir(&self) -> Result<PathBuf, PathError> {
        match &self.base {
            Some(base) => Ok(base.join("data")),
            None => dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .ok_or(PathError::HomeDirNotFound),
        }
    }

    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("switchyard.toml"))
    }

    /// Root directory of the directory-backed durable store.
    pub fn state_dir(&self) -> Result<PathBuf, PathError> {
        Ok(self.data_dir()?.join("state"))
    }
}
