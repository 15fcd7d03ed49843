//! Upstream GBIF API contract.
//!
//! This module defines the [`GbifApi`] trait consumed by the resolver and the
//! fetcher. Two read-only endpoints are used:
//!
//! - `species/match` - resolve a free-text name to a single best backbone match
//! - `occurrence/search` - offset/limit paginated occurrence search
//!
//! [`GbifClient`] implements the trait over HTTP with retry and backoff;
//! [`MockApi`] replays scripted responses for tests.
//!
//! # Transient vs. permanent errors
//!
//! Connection failures, timeouts, HTTP 429 and HTTP 500/502/503/504 are
//! transient: [`GbifClient`] retries them with exponential backoff and, once
//! the attempts run out, reports [`GbifError::RetriesExhausted`] carrying the
//! last underlying error. Everything else is returned immediately.

mod client;
pub mod mock;

pub use client::{GbifClient, DEFAULT_API_BASE};
pub use mock::MockApi;

use async_trait::async_trait;

use crate::models::{OccurrencePage, TaxonMatch};

/// Endpoint used for taxon name matching
pub const SPECIES_MATCH_ENDPOINT: &str = "species/match";

/// Endpoint used for occurrence search and counting
pub const OCCURRENCE_SEARCH_ENDPOINT: &str = "occurrence/search";

/// Largest page the occurrence search endpoint will serve
pub const MAX_PAGE_SIZE: u32 = 300;

/// Largest offset the occurrence search endpoint will honour for one query
pub const MAX_OFFSET: u64 = 100_000;

/// The GbifApi trait is the seam between the acquisition pipeline and the
/// remote service.
#[async_trait]
pub trait GbifApi: Send + Sync + std::fmt::Debug {
    /// Match a name against the backbone taxonomy, returning the single best
    /// candidate (which may have match type `NONE`).
    async fn match_name(&self, query: &NameMatchQuery) -> Result<TaxonMatch, GbifError>;

    /// Fetch one page of occurrence search results
    async fn search_occurrences(&self, query: &OccurrenceQuery)
        -> Result<OccurrencePage, GbifError>;

    /// Count occurrences matching the query without fetching any records
    async fn count_occurrences(&self, query: &OccurrenceQuery) -> Result<u64, GbifError> {
        let count_query = query.clone().count_only();
        let page = self.search_occurrences(&count_query).await?;
        Ok(page.count)
    }
}

/// Parameters for the name-match endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatchQuery {
    /// Free-text name to match
    pub name: String,
    /// Kingdom to restrict the match to
    pub kingdom: Option<String>,
    /// Class to restrict the match to (e.g. "Insecta")
    pub class_name: Option<String>,
}

impl NameMatchQuery {
    /// Create a query for a name with no higher-taxon restriction
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kingdom: None,
            class_name: None,
        }
    }

    /// Restrict the match to a kingdom
    pub fn kingdom(mut self, kingdom: impl Into<String>) -> Self {
        self.kingdom = Some(kingdom.into());
        self
    }

    /// Restrict the match to a class
    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Render as query-string pairs
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("name", self.name.clone())];
        if let Some(kingdom) = &self.kingdom {
            params.push(("kingdom", kingdom.clone()));
        }
        if let Some(class_name) = &self.class_name {
            params.push(("class", class_name.clone()));
        }
        params
    }
}

/// Parameters for the occurrence search endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceQuery {
    /// Backbone taxon key returned by name matching
    pub taxon_key: u64,
    /// Only return georeferenced records
    pub has_coordinate: bool,
    /// Restrict to a single calendar year
    pub year: Option<i32>,
    /// Restrict to a country (ISO 3166 code)
    pub country: Option<String>,
    /// Restrict to these basis-of-record values (any of)
    pub basis_of_record: Vec<String>,
    /// Page offset
    pub offset: u64,
    /// Page size
    pub limit: u32,
}

impl OccurrenceQuery {
    /// Create a query for a taxon with the default record-type filter
    pub fn new(taxon_key: u64) -> Self {
        Self {
            taxon_key,
            has_coordinate: true,
            year: None,
            country: None,
            basis_of_record: vec!["PRESERVED_SPECIMEN".to_string()],
            offset: 0,
            limit: MAX_PAGE_SIZE,
        }
    }

    /// Turn this into a count-only query (no records, no paging)
    pub fn count_only(mut self) -> Self {
        self.offset = 0;
        self.limit = 0;
        self
    }

    /// Render as query-string pairs; repeated keys express "any of"
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("taxonKey", self.taxon_key.to_string()),
            ("hasCoordinate", self.has_coordinate.to_string()),
        ];

        for basis in &self.basis_of_record {
            params.push(("basisOfRecord", basis.clone()));
        }

        if let Some(year) = self.year {
            params.push(("year", year.to_string()));
        }

        if let Some(country) = &self.country {
            params.push(("country", country.clone()));
        }

        if self.limit == 0 {
            params.push(("limit", "0".to_string()));
        } else {
            params.push(("limit", self.limit.to_string()));
            params.push(("offset", self.offset.to_string()));
        }

        params
    }
}

/// Errors that can occur when talking to GBIF
#[derive(Debug, Clone, thiserror::Error)]
pub enum GbifError {
    /// Name unresolvable, or a strict-mode rank/name mismatch
    #[error("Taxon not found: {0}")]
    TaxonNotFound(String),

    /// HTTP 429 (with optional Retry-After seconds)
    #[error("GBIF rate limit exceeded")]
    RateLimit(Option<u64>),

    /// Non-success HTTP status other than 429
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection-level failure
    #[error("Connection error: {0}")]
    Network(String),

    /// Connect or read timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// The response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// A transient failure persisted through every retry attempt
    #[error("API request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<GbifError> },
}

impl GbifError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            GbifError::RateLimit(_) | GbifError::Network(_) | GbifError::Timeout(_) => true,
            GbifError::Http { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Whether this error is (or was ultimately caused by) rate limiting
    pub fn is_rate_limit(&self) -> bool {
        match self {
            GbifError::RateLimit(_) => true,
            GbifError::RetriesExhausted { last, .. } => last.is_rate_limit(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GbifError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GbifError::Timeout(err.to_string())
        } else if err.is_decode() {
            GbifError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            GbifError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            GbifError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GbifError {
    fn from(err: serde_json::Error) -> Self {
        GbifError::Parse(format!("JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GbifError::RateLimit(None).is_transient());
        assert!(GbifError::Network("refused".to_string()).is_transient());
        assert!(GbifError::Timeout("read".to_string()).is_transient());
        for status in [500, 502, 503, 504] {
            let err = GbifError::Http {
                status,
                message: String::new(),
            };
            assert!(err.is_transient(), "{} should be transient", status);
        }

        let not_found = GbifError::Http {
            status: 404,
            message: String::new(),
        };
        assert!(!not_found.is_transient());
        assert!(!GbifError::Parse("bad".to_string()).is_transient());
        assert!(!GbifError::TaxonNotFound("x".to_string()).is_transient());
    }

    #[test]
    fn test_rate_limit_survives_exhaustion() {
        let err = GbifError::RetriesExhausted {
            attempts: 4,
            last: Box::new(GbifError::RateLimit(Some(30))),
        };
        assert!(err.is_rate_limit());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("after 4 attempts"));
    }

    #[test]
    fn test_occurrence_query_params() {
        let mut query = OccurrenceQuery::new(1035566);
        query.year = Some(2020);
        query.offset = 600;
        query.limit = 300;
        query.basis_of_record = vec![
            "PRESERVED_SPECIMEN".to_string(),
            "MATERIAL_SAMPLE".to_string(),
        ];

        let params = query.to_params();
        assert!(params.contains(&("taxonKey", "1035566".to_string())));
        assert!(params.contains(&("hasCoordinate", "true".to_string())));
        assert!(params.contains(&("year", "2020".to_string())));
        assert!(params.contains(&("offset", "600".to_string())));
        assert!(params.contains(&("limit", "300".to_string())));
        let bases: Vec<_> = params.iter().filter(|(k, _)| *k == "basisOfRecord").collect();
        assert_eq!(bases.len(), 2);
    }

    #[test]
    fn test_count_only_drops_paging() {
        let mut query = OccurrenceQuery::new(1);
        query.offset = 900;
        let params = query.count_only().to_params();
        assert!(params.contains(&("limit", "0".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "offset"));
    }

    #[test]
    fn test_name_match_params() {
        let query = NameMatchQuery::new("Nebria")
            .kingdom("Animalia")
            .class_name("Insecta");
        let params = query.to_params();
        assert_eq!(params[0], ("name", "Nebria".to_string()));
        assert!(params.contains(&("kingdom", "Animalia".to_string())));
        assert!(params.contains(&("class", "Insecta".to_string())));
    }
}
