//! Tool settings
//!
//! Settings come from a JSON file: an explicit path, or
//! `<config dir>/berth/config.json` when present. Missing keys take their
//! defaults, and command line flags override whatever the file says.

use crate::error::{BerthError, Result};
use crate::validate::ValidationOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "config.json";

/// Berth settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Treat warnings as failures
    pub strict: bool,
    /// Check that referenced env files exist
    pub check_env_files: bool,
    /// Warn about declared but unmounted volumes
    pub warn_unused_volumes: bool,
    /// Project name when neither the descriptor nor the CLI gives one
    pub default_project_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict: false,
            check_env_files: true,
            warn_unused_volumes: true,
            default_project_name: None,
        }
    }
}

impl Settings {
    /// Default settings location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("berth").join(SETTINGS_FILE))
    }

    /// Load settings from an explicit path, the default location, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            BerthError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }

    /// Validation options for descriptors that live in `base_dir`
    pub fn validation_options(&self, base_dir: Option<PathBuf>) -> ValidationOptions {
        ValidationOptions {
            check_env_files: self.check_env_files,
            warn_unused_volumes: self.warn_unused_volumes,
            base_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_settings_use_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"strict": true}"#).unwrap();

        let settings = Settings::load(Some(path.as_path())).unwrap();
        assert!(settings.strict);
        assert!(settings.check_env_files);
        assert!(settings.warn_unused_volumes);
        assert_eq!(settings.default_project_name, None);
    }

    #[test]
    fn test_invalid_settings_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(BerthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_explicit_settings_file() {
        let temp = tempdir().unwrap();
        assert!(matches!(
            Settings::load(Some(temp.path().join("absent.json").as_path())),
            Err(BerthError::Io(_))
        ));
    }

    #[test]
    fn test_validation_options() {
        let settings = Settings {
            warn_unused_volumes: false,
            ..Default::default()
        };
        let options = settings.validation_options(Some(PathBuf::from("/srv/infra")));
        assert!(!options.warn_unused_volumes);
        assert!(options.check_env_files);
        assert_eq!(options.base_dir, Some(PathBuf::from("/srv/infra")));
    }
}
