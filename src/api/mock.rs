//! Mock GBIF API for testing purposes.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::api::{GbifApi, GbifError, NameMatchQuery, OccurrenceQuery};
use crate::models::{MatchType, OccurrencePage, OccurrenceRecord, TaxonMatch, TaxonRank};

/// A mock API that replays scripted responses.
///
/// Occurrence pages are queued per year and served in order; once a year's
/// queue is drained the mock answers with an empty final page. Count-only
/// queries (`limit == 0`) are answered from [`MockApi::set_count`].
#[derive(Debug, Default)]
pub struct MockApi {
    match_response: Mutex<Option<Result<TaxonMatch, GbifError>>>,
    pages: Mutex<HashMap<Option<i32>, VecDeque<Result<OccurrencePage, GbifError>>>>,
    count: Mutex<Option<Result<u64, GbifError>>>,
    name_queries: Mutex<Vec<NameMatchQuery>>,
    occurrence_queries: Mutex<Vec<OccurrenceQuery>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockApi {
    /// Create a new mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name-match response.
    pub fn set_match_response(&self, response: Result<TaxonMatch, GbifError>) {
        *lock(&self.match_response) = Some(response);
    }

    /// Queue a page (or an error) for the given year.
    pub fn push_page(&self, year: Option<i32>, page: Result<OccurrencePage, GbifError>) {
        lock(&self.pages).entry(year).or_default().push_back(page);
    }

    /// Set the answer to count-only queries.
    pub fn set_count(&self, count: Result<u64, GbifError>) {
        *lock(&self.count) = Some(count);
    }

    /// Name-match queries received so far.
    pub fn name_queries(&self) -> Vec<NameMatchQuery> {
        lock(&self.name_queries).clone()
    }

    /// Occurrence queries received so far, count-only queries included.
    pub fn occurrence_queries(&self) -> Vec<OccurrenceQuery> {
        lock(&self.occurrence_queries).clone()
    }

    /// Occurrence queries that asked for records.
    pub fn page_queries(&self) -> Vec<OccurrenceQuery> {
        self.occurrence_queries()
            .into_iter()
            .filter(|q| q.limit > 0)
            .collect()
    }
}

#[async_trait]
impl GbifApi for MockApi {
    async fn match_name(&self, query: &NameMatchQuery) -> Result<TaxonMatch, GbifError> {
        lock(&self.name_queries).push(query.clone());
        match &*lock(&self.match_response) {
            Some(response) => response.clone(),
            None => Ok(TaxonMatch::default()),
        }
    }

    async fn search_occurrences(
        &self,
        query: &OccurrenceQuery,
    ) -> Result<OccurrencePage, GbifError> {
        lock(&self.occurrence_queries).push(query.clone());

        if query.limit == 0 {
            let count = lock(&self.count).clone().unwrap_or(Ok(0))?;
            return Ok(OccurrencePage {
                count,
                ..OccurrencePage::default()
            });
        }

        let next = lock(&self.pages)
            .get_mut(&query.year)
            .and_then(VecDeque::pop_front);

        match next {
            Some(page) => page,
            None => Ok(OccurrencePage {
                offset: query.offset,
                limit: u64::from(query.limit),
                end_of_records: true,
                ..OccurrencePage::default()
            }),
        }
    }
}

/// Helper function to create a mock occurrence record for testing.
pub fn make_record(key: u64, year: Option<i32>) -> OccurrenceRecord {
    OccurrenceRecord {
        year,
        latitude: Some(46.5),
        longitude: Some(10.2),
        coordinate_uncertainty: Some(100.0),
        elevation: Some(2100.0),
        ..OccurrenceRecord::new(key)
    }
}

/// Helper function to create a mock page of results.
pub fn make_page(records: Vec<OccurrenceRecord>, end_of_records: bool) -> OccurrencePage {
    OccurrencePage {
        offset: 0,
        limit: records.len() as u64,
        end_of_records,
        count: records.len() as u64,
        results: records,
        skipped: 0,
    }
}

/// Helper function to create an exact backbone match for testing.
pub fn make_match(usage_key: u64, canonical_name: &str, rank: TaxonRank) -> TaxonMatch {
    TaxonMatch {
        usage_key,
        scientific_name: canonical_name.to_string(),
        canonical_name: canonical_name.to_string(),
        rank,
        status: "ACCEPTED".to_string(),
        confidence: 99,
        match_type: MatchType::Exact,
        ..TaxonMatch::default()
    }
}
