//! Validated filter configuration.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::models::TaxonRank;
use crate::utils::{clean_string_list, Case};

/// Earliest year accepted for either end of the year range
pub const MIN_YEAR: i32 = 1700;

/// Default first year of the range
pub const DEFAULT_YEAR_START: i32 = 1800;

/// Default maximum coordinate uncertainty in meters
pub const DEFAULT_UNCERTAINTY_MAX: u32 = 1000;

/// Record type requested when none is configured
pub const DEFAULT_BASIS_OF_RECORD: &str = "PRESERVED_SPECIMEN";

/// FilterConfig construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Either genus or family must be specified")]
    MissingTaxon,

    #[error("Specify either genus or family, not both (got genus '{genus}' and family '{family}')")]
    ConflictingTaxon { genus: String, family: String },

    #[error("{field} must be >= 1700, got {year}")]
    YearTooEarly { field: &'static str, year: i32 },

    #[error("{field} cannot be in the future (max: {max}), got {year}")]
    YearInFuture {
        field: &'static str,
        year: i32,
        max: i32,
    },

    #[error("year_start ({start}) cannot be after year_end ({end})")]
    YearOrder { start: i32, end: i32 },

    #[error("uncertainty_max must be a non-negative integer, got {0}")]
    NegativeUncertainty(i64),
}

/// The taxon a run is anchored on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonAnchor {
    Genus(String),
    Family(String),
}

impl TaxonAnchor {
    /// The taxon name as given
    pub fn name(&self) -> &str {
        match self {
            TaxonAnchor::Genus(name) | TaxonAnchor::Family(name) => name,
        }
    }

    /// The rank the name is expected to resolve to
    pub fn rank(&self) -> TaxonRank {
        match self {
            TaxonAnchor::Genus(_) => TaxonRank::Genus,
            TaxonAnchor::Family(_) => TaxonRank::Family,
        }
    }
}

/// Criteria applied to every fetched record.
///
/// Only constructible through [`FilterConfig::builder`], so a value of this
/// type always satisfies: exactly one taxon anchor, `1700 <= year_start <=
/// year_end <= current year + 1`, and cleaned allow-lists (species and
/// institutions lowercased, countries and record types uppercased).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    anchor: TaxonAnchor,
    species: Vec<String>,
    year_start: i32,
    year_end: i32,
    uncertainty_max: u32,
    require_year: bool,
    require_elevation: bool,
    keep_unknown_uncertainty: bool,
    countries: Vec<String>,
    institutions: Vec<String>,
    basis_of_record: Vec<String>,
    deduplicate: bool,
}

impl FilterConfig {
    /// Start building a configuration
    pub fn builder() -> FilterConfigBuilder {
        FilterConfigBuilder::default()
    }

    pub fn anchor(&self) -> &TaxonAnchor {
        &self.anchor
    }

    /// Genus name, when the run is anchored on a genus
    pub fn genus(&self) -> Option<&str> {
        match &self.anchor {
            TaxonAnchor::Genus(name) => Some(name),
            TaxonAnchor::Family(_) => None,
        }
    }

    /// Family name, when the run is anchored on a family
    pub fn family(&self) -> Option<&str> {
        match &self.anchor {
            TaxonAnchor::Family(name) => Some(name),
            TaxonAnchor::Genus(_) => None,
        }
    }

    /// Specific epithets to keep (lowercase); empty keeps every species
    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn year_start(&self) -> i32 {
        self.year_start
    }

    pub fn year_end(&self) -> i32 {
        self.year_end
    }

    /// Maximum coordinate uncertainty in meters (inclusive)
    pub fn uncertainty_max(&self) -> u32 {
        self.uncertainty_max
    }

    pub fn require_year(&self) -> bool {
        self.require_year
    }

    pub fn require_elevation(&self) -> bool {
        self.require_elevation
    }

    pub fn keep_unknown_uncertainty(&self) -> bool {
        self.keep_unknown_uncertainty
    }

    /// Country codes to keep (uppercase)
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    /// Institution codes to keep (lowercase)
    pub fn institutions(&self) -> &[String] {
        &self.institutions
    }

    /// Record types requested from the API (uppercase)
    pub fn basis_of_record(&self) -> &[String] {
        &self.basis_of_record
    }

    pub fn deduplicate(&self) -> bool {
        self.deduplicate
    }

    /// A builder pre-filled with this configuration
    pub fn to_builder(&self) -> FilterConfigBuilder {
        let (genus, family) = match &self.anchor {
            TaxonAnchor::Genus(name) => (Some(name.clone()), None),
            TaxonAnchor::Family(name) => (None, Some(name.clone())),
        };

        FilterConfigBuilder {
            genus,
            family,
            species: self.species.clone(),
            year_start: self.year_start,
            year_end: Some(self.year_end),
            uncertainty_max: i64::from(self.uncertainty_max),
            require_year: self.require_year,
            require_elevation: self.require_elevation,
            keep_unknown_uncertainty: self.keep_unknown_uncertainty,
            countries: self.countries.clone(),
            institutions: self.institutions.clone(),
            basis_of_record: self.basis_of_record.clone(),
            deduplicate: self.deduplicate,
        }
    }
}

/// Builder for [`FilterConfig`]; every check runs in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct FilterConfigBuilder {
    genus: Option<String>,
    family: Option<String>,
    species: Vec<String>,
    year_start: i32,
    year_end: Option<i32>,
    uncertainty_max: i64,
    require_year: bool,
    require_elevation: bool,
    keep_unknown_uncertainty: bool,
    countries: Vec<String>,
    institutions: Vec<String>,
    basis_of_record: Vec<String>,
    deduplicate: bool,
}

impl Default for FilterConfigBuilder {
    fn default() -> Self {
        Self {
            genus: None,
            family: None,
            species: Vec::new(),
            year_start: DEFAULT_YEAR_START,
            year_end: None,
            uncertainty_max: i64::from(DEFAULT_UNCERTAINTY_MAX),
            require_year: true,
            require_elevation: true,
            keep_unknown_uncertainty: true,
            countries: Vec::new(),
            institutions: Vec::new(),
            basis_of_record: vec![DEFAULT_BASIS_OF_RECORD.to_string()],
            deduplicate: true,
        }
    }
}

impl FilterConfigBuilder {
    pub fn genus(mut self, genus: impl Into<String>) -> Self {
        self.genus = Some(genus.into());
        self
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn species<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.species = species.into_iter().map(Into::into).collect();
        self
    }

    pub fn year_start(mut self, year: i32) -> Self {
        self.year_start = year;
        self
    }

    /// Last year of the range; defaults to the current year
    pub fn year_end(mut self, year: Option<i32>) -> Self {
        self.year_end = year;
        self
    }

    pub fn uncertainty_max(mut self, meters: i64) -> Self {
        self.uncertainty_max = meters;
        self
    }

    pub fn require_year(mut self, require: bool) -> Self {
        self.require_year = require;
        self
    }

    pub fn require_elevation(mut self, require: bool) -> Self {
        self.require_elevation = require;
        self
    }

    pub fn keep_unknown_uncertainty(mut self, keep: bool) -> Self {
        self.keep_unknown_uncertainty = keep;
        self
    }

    pub fn countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    pub fn institutions<I, S>(mut self, institutions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.institutions = institutions.into_iter().map(Into::into).collect();
        self
    }

    pub fn basis_of_record<I, S>(mut self, basis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.basis_of_record = basis.into_iter().map(Into::into).collect();
        self
    }

    pub fn deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Validate against the current calendar year and build
    pub fn build(self) -> Result<FilterConfig, ConfigError> {
        self.build_as_of(chrono::Local::now().year())
    }

    /// Validate against the given calendar year and build
    pub fn build_as_of(self, current_year: i32) -> Result<FilterConfig, ConfigError> {
        let genus = non_empty(self.genus);
        let family = non_empty(self.family);

        let anchor = match (genus, family) {
            (Some(genus), None) => TaxonAnchor::Genus(genus),
            (None, Some(family)) => TaxonAnchor::Family(family),
            (None, None) => return Err(ConfigError::MissingTaxon),
            (Some(genus), Some(family)) => {
                return Err(ConfigError::ConflictingTaxon { genus, family })
            }
        };

        let year_start = validate_year(self.year_start, "year_start", current_year)?;
        let year_end = match self.year_end {
            Some(year) => validate_year(year, "year_end", current_year)?,
            None => current_year,
        };

        if year_start > year_end {
            return Err(ConfigError::YearOrder {
                start: year_start,
                end: year_end,
            });
        }

        if self.uncertainty_max < 0 {
            return Err(ConfigError::NegativeUncertainty(self.uncertainty_max));
        }
        let uncertainty_max = u32::try_from(self.uncertainty_max).unwrap_or(u32::MAX);

        Ok(FilterConfig {
            anchor,
            species: clean_string_list(self.species, Case::Lower),
            year_start,
            year_end,
            uncertainty_max,
            require_year: self.require_year,
            require_elevation: self.require_elevation,
            keep_unknown_uncertainty: self.keep_unknown_uncertainty,
            countries: clean_string_list(self.countries, Case::Upper),
            institutions: clean_string_list(self.institutions, Case::Lower),
            basis_of_record: clean_string_list(self.basis_of_record, Case::Upper),
            deduplicate: self.deduplicate,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn validate_year(year: i32, field: &'static str, current_year: i32) -> Result<i32, ConfigError> {
    if year < MIN_YEAR {
        return Err(ConfigError::YearTooEarly { field, year });
    }
    if year > current_year + 1 {
        return Err(ConfigError::YearInFuture {
            field,
            year,
            max: current_year + 1,
        });
    }
    Ok(year)
}
