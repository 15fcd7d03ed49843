//! Record filtering.
//!
//! [`FilterEngine`] evaluates each record against a fixed, short-circuiting
//! chain of checks. The first failing check decides the [`ReasonCode`], so the
//! order below is part of the contract:
//!
//! 1. `duplicate` (when deduplication is on)
//! 2. `missing_year`
//! 3. `year_too_old` / `year_too_new`
//! 4. `missing_elevation`
//! 5. `uncertainty_exceeded` / `uncertainty_unknown`
//! 6. `species_not_matched`
//! 7. `country_not_matched`
//! 8. `institution_not_matched`
//!
//! Filtering never fails: absent or malformed fields are treated as absence.

mod config;

pub use config::{
    ConfigError, FilterConfig, FilterConfigBuilder, TaxonAnchor, DEFAULT_BASIS_OF_RECORD,
    DEFAULT_UNCERTAINTY_MAX, DEFAULT_YEAR_START, MIN_YEAR,
};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::models::OccurrenceRecord;
use crate::utils::{format_number, Deduplicator};

/// Why a record was dropped. Variants are declared in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Duplicate,
    MissingYear,
    YearTooOld,
    YearTooNew,
    MissingElevation,
    UncertaintyExceeded,
    UncertaintyUnknown,
    SpeciesNotMatched,
    CountryNotMatched,
    InstitutionNotMatched,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 10] = [
        ReasonCode::Duplicate,
        ReasonCode::MissingYear,
        ReasonCode::YearTooOld,
        ReasonCode::YearTooNew,
        ReasonCode::MissingElevation,
        ReasonCode::UncertaintyExceeded,
        ReasonCode::UncertaintyUnknown,
        ReasonCode::SpeciesNotMatched,
        ReasonCode::CountryNotMatched,
        ReasonCode::InstitutionNotMatched,
    ];

    /// Stable machine-readable code
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Duplicate => "duplicate",
            ReasonCode::MissingYear => "missing_year",
            ReasonCode::YearTooOld => "year_too_old",
            ReasonCode::YearTooNew => "year_too_new",
            ReasonCode::MissingElevation => "missing_elevation",
            ReasonCode::UncertaintyExceeded => "uncertainty_exceeded",
            ReasonCode::UncertaintyUnknown => "uncertainty_unknown",
            ReasonCode::SpeciesNotMatched => "species_not_matched",
            ReasonCode::CountryNotMatched => "country_not_matched",
            ReasonCode::InstitutionNotMatched => "institution_not_matched",
        }
    }

    /// Label used in the end-of-run summary
    pub fn label(&self) -> &'static str {
        match self {
            ReasonCode::Duplicate => "Duplicates",
            ReasonCode::MissingYear => "Missing year",
            ReasonCode::YearTooOld => "Year before range",
            ReasonCode::YearTooNew => "Year after range",
            ReasonCode::MissingElevation => "Missing elevation",
            ReasonCode::UncertaintyExceeded => "Uncertainty exceeded",
            ReasonCode::UncertaintyUnknown => "Unknown uncertainty (dropped)",
            ReasonCode::SpeciesNotMatched => "Species not matched",
            ReasonCode::CountryNotMatched => "Country not matched",
            ReasonCode::InstitutionNotMatched => "Institution not matched",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinate uncertainty relative to the configured maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyStatus {
    /// Present and within the maximum (inclusive)
    Known,
    /// Absent or not a number
    Unknown,
    /// Present and above the maximum
    Exceeded,
}

impl UncertaintyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UncertaintyStatus::Known => "known",
            UncertaintyStatus::Unknown => "unknown",
            UncertaintyStatus::Exceeded => "exceeded",
        }
    }
}

impl fmt::Display for UncertaintyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterResult {
    pub keep: bool,
    /// Set exactly when `keep` is false
    pub reason: Option<ReasonCode>,
    pub uncertainty: UncertaintyStatus,
}

impl FilterResult {
    fn kept(uncertainty: UncertaintyStatus) -> Self {
        Self {
            keep: true,
            reason: None,
            uncertainty,
        }
    }

    fn dropped(reason: ReasonCode, uncertainty: UncertaintyStatus) -> Self {
        Self {
            keep: false,
            reason: Some(reason),
            uncertainty,
        }
    }
}

/// A record that survived filtering, with its uncertainty classification
/// for highlighting
#[derive(Debug, Clone, PartialEq)]
pub struct KeptRecord {
    pub record: OccurrenceRecord,
    pub uncertainty: UncertaintyStatus,
}

/// Per-run filtering statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total: u64,
    pub kept: u64,
    /// Drop counts; only reasons that occurred are present
    pub by_reason: BTreeMap<ReasonCode, u64>,
    /// Kept records whose uncertainty was unknown
    pub unknown_uncertainty_kept: u64,
}

impl FilterStats {
    /// Account for one evaluated record
    pub fn record(&mut self, result: &FilterResult) {
        self.total += 1;
        match result.reason {
            None => {
                self.kept += 1;
                if result.uncertainty == UncertaintyStatus::Unknown {
                    self.unknown_uncertainty_kept += 1;
                }
            }
            Some(reason) => *self.by_reason.entry(reason).or_insert(0) += 1,
        }
    }

    /// Number of records dropped for `reason`
    pub fn dropped(&self, reason: ReasonCode) -> u64 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Total number of dropped records
    pub fn dropped_total(&self) -> u64 {
        self.by_reason.values().sum()
    }

    /// Human-readable end-of-run report
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Total records processed: {}", format_number(self.total)),
            format!("Records kept: {}", format_number(self.kept)),
        ];

        if !self.by_reason.is_empty() {
            lines.push(String::new());
            lines.push("Exclusion reasons:".to_string());
            for (reason, count) in &self.by_reason {
                lines.push(format!("  - {}: {}", reason.label(), format_number(*count)));
            }
        }

        if self.unknown_uncertainty_kept > 0 {
            lines.push(String::new());
            lines.push(format!(
                "Note: {} records with unknown uncertainty were kept (highlighted in the export)",
                format_number(self.unknown_uncertainty_kept)
            ));
        }

        lines.join("\n")
    }
}

/// Applies a [`FilterConfig`] to records one at a time.
///
/// Holds the deduplication set for the run it serves; use one engine per
/// run, or [`reset`](Self::reset) between runs.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    config: FilterConfig,
    seen: Deduplicator,
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            seen: Deduplicator::new(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Evaluate one record
    pub fn apply(&mut self, record: &OccurrenceRecord) -> FilterResult {
        let uncertainty = self.classify_uncertainty(record);

        if let Some(reason) = self.first_failure(record, uncertainty) {
            return FilterResult::dropped(reason, uncertainty);
        }

        FilterResult::kept(uncertainty)
    }

    fn first_failure(
        &mut self,
        record: &OccurrenceRecord,
        uncertainty: UncertaintyStatus,
    ) -> Option<ReasonCode> {
        let config = &self.config;

        if config.deduplicate() && !self.seen.check_and_mark(record.key) {
            return Some(ReasonCode::Duplicate);
        }

        match record.year {
            None if config.require_year() => return Some(ReasonCode::MissingYear),
            Some(year) if year < config.year_start() => return Some(ReasonCode::YearTooOld),
            Some(year) if year > config.year_end() => return Some(ReasonCode::YearTooNew),
            _ => {}
        }

        if config.require_elevation() && record.elevation.is_none() {
            return Some(ReasonCode::MissingElevation);
        }

        match uncertainty {
            UncertaintyStatus::Exceeded => return Some(ReasonCode::UncertaintyExceeded),
            UncertaintyStatus::Unknown if !config.keep_unknown_uncertainty() => {
                return Some(ReasonCode::UncertaintyUnknown)
            }
            _ => {}
        }

        if !config.species().is_empty() && !self.matches_species(record) {
            return Some(ReasonCode::SpeciesNotMatched);
        }

        if !config.countries().is_empty() {
            let country = record.country.as_deref().unwrap_or_default().to_uppercase();
            if !config.countries().iter().any(|c| country.contains(c.as_str())) {
                return Some(ReasonCode::CountryNotMatched);
            }
        }

        if !config.institutions().is_empty() {
            let institution = record
                .institution_code
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if !config
                .institutions()
                .iter()
                .any(|i| institution.contains(i.as_str()))
            {
                return Some(ReasonCode::InstitutionNotMatched);
            }
        }

        None
    }

    fn classify_uncertainty(&self, record: &OccurrenceRecord) -> UncertaintyStatus {
        match record.coordinate_uncertainty {
            Some(meters) if meters.is_finite() => {
                if meters <= f64::from(self.config.uncertainty_max()) {
                    UncertaintyStatus::Known
                } else {
                    UncertaintyStatus::Exceeded
                }
            }
            _ => UncertaintyStatus::Unknown,
        }
    }

    /// Exact epithet match first, then any listed species inside the
    /// scientific name
    fn matches_species(&self, record: &OccurrenceRecord) -> bool {
        let species = self.config.species();

        let epithet = record
            .specific_epithet
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        if species.iter().any(|s| *s == epithet) {
            return true;
        }

        let scientific_name = record
            .scientific_name
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        species.iter().any(|s| scientific_name.contains(s.as_str()))
    }

    /// Evaluate a finite batch, returning kept records and statistics
    pub fn filter_all<I>(&mut self, records: I) -> (Vec<KeptRecord>, FilterStats)
    where
        I: IntoIterator<Item = OccurrenceRecord>,
    {
        let mut kept = Vec::new();
        let mut stats = FilterStats::default();

        for record in records {
            let result = self.apply(&record);
            stats.record(&result);
            if result.keep {
                kept.push(KeptRecord {
                    record,
                    uncertainty: result.uncertainty,
                });
            }
        }

        (kept, stats)
    }

    /// Forget every key seen so far
    pub fn reset(&mut self) {
        self.seen.reset();
    }

    /// Number of unique keys seen by the duplicate check
    pub fn seen_count(&self) -> usize {
        self.seen.unique_count()
    }
}

/// Filter a batch of records with a fresh engine
pub fn filter_records<I>(records: I, config: &FilterConfig) -> (Vec<KeptRecord>, FilterStats)
where
    I: IntoIterator<Item = OccurrenceRecord>,
{
    FilterEngine::new(config.clone()).filter_all(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FilterConfigBuilder {
        FilterConfig::builder()
            .genus("Nebria")
            .year_start(1900)
            .year_end(Some(2024))
    }

    fn record(key: u64) -> OccurrenceRecord {
        OccurrenceRecord {
            year: Some(2020),
            coordinate_uncertainty: Some(50.0),
            elevation: Some(1500.0),
            ..OccurrenceRecord::new(key)
        }
    }

    fn engine(builder: FilterConfigBuilder) -> FilterEngine {
        FilterEngine::new(builder.build_as_of(2026).unwrap())
    }

    #[test]
    fn test_keeps_clean_record() {
        let mut engine = engine(config());
        let result = engine.apply(&record(1));

        assert!(result.keep);
        assert_eq!(result.reason, None);
        assert_eq!(result.uncertainty, UncertaintyStatus::Known);
    }

    #[test]
    fn test_duplicate_dropped_on_second_application() {
        let mut engine = engine(config());

        assert!(engine.apply(&record(7)).keep);
        let second = engine.apply(&record(7));
        assert!(!second.keep);
        assert_eq!(second.reason, Some(ReasonCode::Duplicate));
        assert_eq!(engine.seen_count(), 1);

        engine.reset();
        assert!(engine.apply(&record(7)).keep);
    }

    #[test]
    fn test_deduplication_disabled() {
        let mut engine = engine(config().deduplicate(false));

        assert!(engine.apply(&record(7)).keep);
        assert!(engine.apply(&record(7)).keep);
    }

    #[test]
    fn test_uncertainty_boundary_is_inclusive() {
        let mut engine = engine(config().uncertainty_max(1000));

        let at_max = OccurrenceRecord {
            coordinate_uncertainty: Some(1000.0),
            ..record(1)
        };
        let above = OccurrenceRecord {
            coordinate_uncertainty: Some(1001.0),
            ..record(2)
        };

        assert!(engine.apply(&at_max).keep);
        let result = engine.apply(&above);
        assert_eq!(result.reason, Some(ReasonCode::UncertaintyExceeded));
        assert_eq!(result.uncertainty, UncertaintyStatus::Exceeded);
    }

    #[test]
    fn test_unknown_uncertainty_policy() {
        let unknown = OccurrenceRecord {
            coordinate_uncertainty: None,
            ..record(1)
        };

        let kept = engine(config()).apply(&unknown);
        assert!(kept.keep);
        assert_eq!(kept.uncertainty, UncertaintyStatus::Unknown);

        let dropped = engine(config().keep_unknown_uncertainty(false)).apply(&unknown);
        assert_eq!(dropped.reason, Some(ReasonCode::UncertaintyUnknown));
    }

    #[test]
    fn test_missing_year_takes_precedence_over_elevation() {
        let mut engine = engine(config().require_elevation(true));
        let bare = OccurrenceRecord {
            year: None,
            elevation: None,
            ..record(1)
        };

        assert_eq!(engine.apply(&bare).reason, Some(ReasonCode::MissingYear));
    }

    #[test]
    fn test_year_range() {
        let mut engine = engine(config());

        let old = OccurrenceRecord {
            year: Some(1899),
            ..record(1)
        };
        let new = OccurrenceRecord {
            year: Some(2025),
            ..record(2)
        };
        let edge = OccurrenceRecord {
            year: Some(1900),
            ..record(3)
        };

        assert_eq!(engine.apply(&old).reason, Some(ReasonCode::YearTooOld));
        assert_eq!(engine.apply(&new).reason, Some(ReasonCode::YearTooNew));
        assert!(engine.apply(&edge).keep);
    }

    #[test]
    fn test_missing_year_allowed_when_not_required() {
        let mut engine = engine(config().require_year(false));
        let undated = OccurrenceRecord {
            year: None,
            ..record(1)
        };

        assert!(engine.apply(&undated).keep);
    }

    #[test]
    fn test_missing_elevation() {
        let mut engine = engine(config());
        let flat = OccurrenceRecord {
            elevation: None,
            ..record(1)
        };

        assert_eq!(engine.apply(&flat).reason, Some(ReasonCode::MissingElevation));
    }

    #[test]
    fn test_species_epithet_then_scientific_name() {
        let mut engine = engine(config().species(["germarii"]));

        let by_epithet = OccurrenceRecord {
            specific_epithet: Some("Germarii".to_string()),
            ..record(1)
        };
        let by_name = OccurrenceRecord {
            specific_epithet: None,
            scientific_name: Some("Nebria germarii Heer, 1837".to_string()),
            ..record(2)
        };
        let other = OccurrenceRecord {
            specific_epithet: Some("castanea".to_string()),
            scientific_name: Some("Nebria castanea (Bonelli, 1810)".to_string()),
            ..record(3)
        };

        assert!(engine.apply(&by_epithet).keep);
        assert!(engine.apply(&by_name).keep);
        assert_eq!(
            engine.apply(&other).reason,
            Some(ReasonCode::SpeciesNotMatched)
        );
    }

    #[test]
    fn test_country_filter() {
        let mut engine = engine(config().countries(["it", "ch"]));

        let italy = OccurrenceRecord {
            country: Some("IT".to_string()),
            ..record(1)
        };
        let austria = OccurrenceRecord {
            country: Some("AT".to_string()),
            ..record(2)
        };
        let unknown = record(3);

        assert!(engine.apply(&italy).keep);
        assert_eq!(
            engine.apply(&austria).reason,
            Some(ReasonCode::CountryNotMatched)
        );
        assert_eq!(
            engine.apply(&unknown).reason,
            Some(ReasonCode::CountryNotMatched)
        );
    }

    #[test]
    fn test_institution_filter_is_substring() {
        let mut engine = engine(config().institutions(["mzuf"]));

        let held = OccurrenceRecord {
            institution_code: Some("MZUF-ENT".to_string()),
            ..record(1)
        };
        let elsewhere = OccurrenceRecord {
            institution_code: Some("NHMUK".to_string()),
            ..record(2)
        };

        assert!(engine.apply(&held).keep);
        assert_eq!(
            engine.apply(&elsewhere).reason,
            Some(ReasonCode::InstitutionNotMatched)
        );
    }

    #[test]
    fn test_end_to_end_scenario() {
        let config = FilterConfig::builder()
            .genus("Nebria")
            .year_start(1900)
            .year_end(Some(2024))
            .uncertainty_max(1000)
            .require_year(true)
            .require_elevation(false)
            .keep_unknown_uncertainty(true)
            .build_as_of(2026)
            .unwrap();

        let records = vec![
            OccurrenceRecord {
                year: Some(2020),
                coordinate_uncertainty: Some(50.0),
                elevation: Some(1500.0),
                ..OccurrenceRecord::new(1)
            },
            OccurrenceRecord {
                year: None,
                ..OccurrenceRecord::new(2)
            },
            OccurrenceRecord {
                year: Some(2020),
                coordinate_uncertainty: Some(5000.0),
                ..OccurrenceRecord::new(3)
            },
        ];

        let (kept, stats) = filter_records(records, &config);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].record.key, 1);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.kept, 1);
        assert_eq!(
            stats.by_reason,
            BTreeMap::from([
                (ReasonCode::MissingYear, 1),
                (ReasonCode::UncertaintyExceeded, 1)
            ])
        );
    }

    #[test]
    fn test_stats_summary() {
        let mut stats = FilterStats::default();
        stats.record(&FilterResult::kept(UncertaintyStatus::Unknown));
        stats.record(&FilterResult::dropped(
            ReasonCode::MissingYear,
            UncertaintyStatus::Known,
        ));
        for _ in 0..1200 {
            stats.record(&FilterResult::dropped(
                ReasonCode::Duplicate,
                UncertaintyStatus::Known,
            ));
        }

        let summary = stats.summary();
        assert!(summary.contains("Total records processed: 1,202"));
        assert!(summary.contains("Records kept: 1"));
        assert!(summary.contains("  - Duplicates: 1,200"));
        assert!(summary.contains("  - Missing year: 1"));
        assert!(!summary.contains("Missing elevation"));
        assert!(summary.contains("1 records with unknown uncertainty"));
        assert_eq!(stats.dropped_total(), 1201);
        assert_eq!(stats.dropped(ReasonCode::YearTooNew), 0);
    }

    #[test]
    fn test_reason_codes_are_snake_case() {
        for reason in ReasonCode::ALL {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }
}
