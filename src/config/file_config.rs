//! Configuration file support for gbif-downloader.
//!
//! Files may be TOML, YAML or JSON (chosen by extension) and are layered
//! under environment variable overrides prefixed with `GBIF_DOWNLOADER`,
//! using `__` between path segments
//! (e.g. `GBIF_DOWNLOADER__FILTERS__YEAR_START=1900`).
//!
//! # Configuration File Format
//!
//! ```toml
//! [taxonomy]
//! genus = "Nebria"
//! species = ["germarii", "castanea"]
//!
//! [filters]
//! year_start = 1900
//! year_end = 2024
//! uncertainty_max = 1000
//! require_year = true
//! require_elevation = true
//! keep_unknown_uncertainty = true
//! countries = ["IT", "CH", "AT"]
//! institutions = []
//! basis_of_record = ["PRESERVED_SPECIMEN"]
//! deduplicate = true
//!
//! [output]
//! format = "excel"
//! filename = "nebria_alps"
//! highlight_uncertain = true
//!
//! [api]
//! page_size = 300
//! max_retries = 3
//! initial_delay_ms = 1000
//! backoff_multiplier = 2.0
//! kingdom = "Animalia"
//! strict = true
//!
//! [logging]
//! level = "info"
//! ```

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::api::{DEFAULT_API_BASE, MAX_PAGE_SIZE};
use crate::export::{ExportError, ExportFormat};
use crate::fetch::FetchOptions;
use crate::filter::{
    ConfigError, FilterConfig, DEFAULT_BASIS_OF_RECORD, DEFAULT_UNCERTAINTY_MAX,
    DEFAULT_YEAR_START,
};
use crate::taxon::DEFAULT_KINGDOM;
use crate::utils::RetryConfig;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "GBIF_DOWNLOADER";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Taxon to download
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Record filters
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Export settings
    #[serde(default)]
    pub output: OutputConfig,

    /// API client settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging section
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Taxonomy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genus: Option<String>,

    /// Specific epithets
    #[serde(default, alias = "species_list", deserialize_with = "string_or_list")]
    pub species: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

/// Filters configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_year_start")]
    pub year_start: i32,

    /// Defaults to the current year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_end: Option<i32>,

    /// Meters
    #[serde(default = "default_uncertainty_max")]
    pub uncertainty_max: i64,

    #[serde(default = "default_true")]
    pub require_year: bool,

    #[serde(default = "default_true")]
    pub require_elevation: bool,

    #[serde(default = "default_true")]
    pub keep_unknown_uncertainty: bool,

    #[serde(default, deserialize_with = "string_or_list")]
    pub countries: Vec<String>,

    #[serde(default, deserialize_with = "string_or_list")]
    pub institutions: Vec<String>,

    #[serde(default = "default_basis_of_record", deserialize_with = "string_or_list")]
    pub basis_of_record: Vec<String>,

    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            year_start: default_year_start(),
            year_end: None,
            uncertainty_max: default_uncertainty_max(),
            require_year: true,
            require_elevation: true,
            keep_unknown_uncertainty: true,
            countries: Vec::new(),
            institutions: Vec::new(),
            basis_of_record: default_basis_of_record(),
            deduplicate: true,
        }
    }
}

fn default_year_start() -> i32 {
    DEFAULT_YEAR_START
}

fn default_uncertainty_max() -> i64 {
    i64::from(DEFAULT_UNCERTAINTY_MAX)
}

fn default_basis_of_record() -> Vec<String> {
    vec![DEFAULT_BASIS_OF_RECORD.to_string()]
}

fn default_true() -> bool {
    true
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// excel (xlsx), csv, geojson or json
    #[serde(default = "default_format")]
    pub format: String,

    /// Output file name; derived from the taxon name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default = "default_true")]
    pub highlight_uncertain: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            filename: None,
            highlight_uncertain: true,
        }
    }
}

fn default_format() -> String {
    "excel".to_string()
}

/// API client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_kingdom")]
    pub kingdom: String,

    /// Restrict name matching to a class (e.g. "Insecta")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            kingdom: default_kingdom(),
            class_name: None,
            strict: true,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_kingdom() -> String {
    DEFAULT_KINGDOM.to_string()
}

impl ApiConfig {
    /// Retry policy for the HTTP client
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .backoff_multiplier(self.backoff_multiplier.max(1.0))
    }

    /// Paging parameters for the fetcher
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::default().page_size(self.page_size)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when neither RUST_LOG nor -v/--quiet is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl ConfigFile {
    /// Load a file layered under `GBIF_DOWNLOADER__*` environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        Self::build(path, true)
    }

    /// Load a file without environment overrides
    pub fn load_file(path: &Path) -> Result<Self, ConfigFileError> {
        Self::build(path, false)
    }

    fn build(path: &Path, with_env: bool) -> Result<Self, ConfigFileError> {
        if !path.is_file() {
            return Err(ConfigFileError::Io(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let mut builder = config::Config::builder().add_source(config::File::from(path));
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR),
            );
        }

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ConfigFileError::Parse(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigFileError::Serialize(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
            }
        }

        std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
    }

    /// Validate the taxonomy and filters sections into a [`FilterConfig`]
    pub fn to_filter_config(&self) -> Result<FilterConfig, ConfigError> {
        let mut builder = FilterConfig::builder()
            .species(self.taxonomy.species.iter().cloned())
            .year_start(self.filters.year_start)
            .year_end(self.filters.year_end)
            .uncertainty_max(self.filters.uncertainty_max)
            .require_year(self.filters.require_year)
            .require_elevation(self.filters.require_elevation)
            .keep_unknown_uncertainty(self.filters.keep_unknown_uncertainty)
            .countries(self.filters.countries.iter().cloned())
            .institutions(self.filters.institutions.iter().cloned())
            .basis_of_record(self.filters.basis_of_record.iter().cloned())
            .deduplicate(self.filters.deduplicate);

        if let Some(genus) = &self.taxonomy.genus {
            builder = builder.genus(genus.clone());
        }
        if let Some(family) = &self.taxonomy.family {
            builder = builder.family(family.clone());
        }

        builder.build()
    }

    /// Replace the taxonomy and filters sections with `config`
    pub fn set_filter_config(&mut self, config: &FilterConfig) {
        self.taxonomy = TaxonomyConfig {
            genus: config.genus().map(str::to_string),
            species: config.species().to_vec(),
            family: config.family().map(str::to_string),
        };
        self.filters = FiltersConfig {
            year_start: config.year_start(),
            year_end: Some(config.year_end()),
            uncertainty_max: i64::from(config.uncertainty_max()),
            require_year: config.require_year(),
            require_elevation: config.require_elevation(),
            keep_unknown_uncertainty: config.keep_unknown_uncertainty(),
            countries: config.countries().to_vec(),
            institutions: config.institutions().to_vec(),
            basis_of_record: config.basis_of_record().to_vec(),
            deduplicate: config.deduplicate(),
        };
    }

    /// A file holding `config` and default output/api/logging sections
    pub fn from_filter_config(config: &FilterConfig) -> Self {
        let mut file = Self::default();
        file.set_filter_config(config);
        file
    }

    /// The configured export format
    pub fn export_format(&self) -> Result<ExportFormat, ExportError> {
        self.output.format.parse()
    }
}

/// Accept either a list or a single comma-separated string
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrList;

    impl<'de> Visitor<'de> for StringOrList {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a list of strings or a comma-separated string")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                items.push(item);
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(StringOrList)
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),

    #[error("Preset '{0}' not found")]
    PresetNotFound(String),

    #[error("Could not determine the user configuration directory")]
    NoConfigDir,
}
