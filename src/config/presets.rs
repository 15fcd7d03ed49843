//! Named filter presets stored as individual files in one directory.

use std::path::{Path, PathBuf};

use super::file_config::{ConfigFile, ConfigFileError};
use crate::utils::sanitize_filename;

/// Extensions recognised as presets
const PRESET_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

const MAX_PRESET_NAME: usize = 100;

/// A directory of saved configurations, addressed by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config dir>/gbif-downloader/presets`
    pub fn default_location() -> Result<Self, ConfigFileError> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join("gbif-downloader").join("presets")))
            .ok_or(ConfigFileError::NoConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Preset names, sorted. A missing directory has no presets.
    pub fn list(&self) -> Result<Vec<String>, ConfigFileError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ConfigFileError::Io(e.to_string())),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_preset_file(path))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();

        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Where a preset named `name` is saved
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.toml", sanitize_filename(name, MAX_PRESET_NAME)))
    }

    /// Find an existing preset file in any recognised format
    fn find(&self, name: &str) -> Option<PathBuf> {
        let stem = sanitize_filename(name, MAX_PRESET_NAME);
        PRESET_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", stem, ext)))
            .find(|path| path.is_file())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Load a preset without environment overrides
    pub fn load(&self, name: &str) -> Result<ConfigFile, ConfigFileError> {
        let path = self
            .find(name)
            .ok_or_else(|| ConfigFileError::PresetNotFound(name.to_string()))?;
        tracing::debug!("Loading preset '{}' from {}", name, path.display());
        ConfigFile::load_file(&path)
    }

    /// Save (or overwrite) a preset as TOML, returning its path
    pub fn save(&self, name: &str, config: &ConfigFile) -> Result<PathBuf, ConfigFileError> {
        let path = self.path_for(name);
        config.save(&path)?;
        tracing::info!("Saved preset '{}' to {}", name, path.display());
        Ok(path)
    }

    /// Delete a preset; returns whether one existed
    pub fn delete(&self, name: &str) -> Result<bool, ConfigFileError> {
        match self.find(name) {
            Some(path) => {
                std::fs::remove_file(&path).map_err(|e| ConfigFileError::Io(e.to_string()))?;
                tracing::info!("Deleted preset '{}'", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn is_preset_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PRESET_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}
