//! Core data models for taxon matches and occurrence records.

mod occurrence;
mod taxon;

pub use occurrence::{OccurrencePage, OccurrenceRecord};
pub use taxon::{MatchType, TaxonMatch, TaxonRank};
