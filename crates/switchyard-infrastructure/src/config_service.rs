//! Configuration service implementation.
//!
//! Loads `SwitchyardConfig` from an explicit path or from the platform config
//! directory (`~/.config/switchyard/switchyard.toml`) and caches it.

use crate::paths::SwitchyardPaths;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use switchyard_core::{Result, SwitchyardConfig, SwitchyardError};

/// Loads and caches the coordination core configuration.
///
/// A missing file yields the defaults. A present but invalid file is an error.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: Option<PathBuf>,
    paths: SwitchyardPaths,
    config: Arc<RwLock<Option<SwitchyardConfig>>>,
}

impl ConfigService {
    /// Reads from the platform config directory.
    pub fn new() -> Self {
        Self {
            path: None,
            paths: SwitchyardPaths::new(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Reads from an explicit file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Reads from the config directory of `paths`.
    pub fn with_paths(paths: SwitchyardPaths) -> Self {
        Self {
            path: None,
            paths,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    pub fn get_config(&self) -> Result<SwitchyardConfig> {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = read_lock.as_ref() {
                return Ok(cached.clone());
            }
        }

        let loaded = self.load_config()?;

        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = Some(loaded.clone());
        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => self
                .paths
                .config_file()
                .map_err(|e| SwitchyardError::config(e.to_string())),
        }
    }

    fn load_config(&self) -> Result<SwitchyardConfig> {
        let path = self.config_path()?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(SwitchyardConfig::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            SwitchyardError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = SwitchyardConfig::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
