//! Configuration management.
//!
//! A [`ConfigFile`] mirrors what the CLI accepts as flags; command-line
//! values override file values, which override defaults. Saved
//! configurations live in a [`PresetStore`].

mod file_config;
mod presets;

pub use file_config::{
    ApiConfig, ConfigFile, ConfigFileError, FiltersConfig, LoggingConfig, OutputConfig,
    TaxonomyConfig, ENV_PREFIX, ENV_SEPARATOR,
};
pub use presets::PresetStore;

use std::path::{Path, PathBuf};

/// Starter configuration written by `gbif-download init`
pub const EXAMPLE_CONFIG: &str = r#"# gbif-downloader configuration
#
# Command-line flags override these values. Any key can also be set from
# the environment, e.g. GBIF_DOWNLOADER__FILTERS__YEAR_START=1900

[taxonomy]
# Exactly one of genus or family
genus = "Nebria"
# family = "Carabidae"
# Specific epithets; empty keeps every species
species = []

[filters]
year_start = 1800
# year_end = 2024    # defaults to the current year
uncertainty_max = 1000
require_year = true
require_elevation = true
keep_unknown_uncertainty = true
countries = []        # ISO codes, e.g. ["IT", "CH", "AT"]
institutions = []
basis_of_record = ["PRESERVED_SPECIMEN"]
deduplicate = true

[output]
format = "excel"      # excel, csv or geojson
# filename = "nebria"
highlight_uncertain = true

[api]
page_size = 300
max_retries = 3
initial_delay_ms = 1000
backoff_multiplier = 2.0
kingdom = "Animalia"
# class_name = "Insecta"
strict = true

[logging]
# level = "info"
"#;

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigFileError> {
    ConfigFile::load(path)
}

/// `<config dir>/gbif-downloader/config.toml`, if a config dir exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gbif-downloader").join("config.toml"))
}

/// Load the default config file if present, otherwise use defaults
pub fn load_default_config() -> Result<ConfigFile, ConfigFileError> {
    match default_config_path() {
        Some(path) if path.is_file() => {
            tracing::debug!("Loading config from {}", path.display());
            ConfigFile::load(&path)
        }
        _ => Ok(ConfigFile::default()),
    }
}

/// Write [`EXAMPLE_CONFIG`] to `path`; refuses to overwrite unless `force`
pub fn write_example_config(path: &Path, force: bool) -> Result<(), ConfigFileError> {
    if path.exists() && !force {
        return Err(ConfigFileError::Io(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        }
    }

    std::fs::write(path, EXAMPLE_CONFIG).map_err(|e| ConfigFileError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_example_config_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        write_example_config(&path, false).unwrap();

        let config = ConfigFile::load_file(&path).unwrap();
        assert_eq!(config.taxonomy.genus.as_deref(), Some("Nebria"));
        assert_eq!(config.filters, FiltersConfig::default());
        assert_eq!(config.output, OutputConfig::default());
        assert_eq!(config.api, ApiConfig::default());
        assert!(config.to_filter_config().is_ok());
    }

    #[test]
    fn test_example_config_no_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine").unwrap();

        assert!(write_example_config(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");

        write_example_config(&path, true).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("[taxonomy]"));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("gbif-downloader/config.toml"));
        }
    }
}
