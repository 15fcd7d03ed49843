//! Download run orchestration: resolve, fetch, filter, accumulate.

use tracing::Span;

use crate::api::{GbifApi, GbifError};
use crate::fetch::{FetchOptions, FetchRequest, OccurrenceFetcher, ProgressObserver};
use crate::filter::{FilterConfig, FilterEngine, FilterStats, KeptRecord};
use crate::models::TaxonMatch;
use crate::taxon::{TaxonQuery, TaxonResolver, DEFAULT_KINGDOM};

/// Outcome of a run that produced at least a taxon match
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub taxon: TaxonMatch,
    /// Records that survived filtering, in fetch order
    pub records: Vec<KeptRecord>,
    pub stats: FilterStats,
    /// Server-reported estimate used for progress (0 if unknown)
    pub total_estimate: u64,
    /// Whether the run stopped early on request
    pub cancelled: bool,
}

/// The three ways a run can end without usable records
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The name did not resolve (or failed strict validation)
    #[error("No taxon match: {0}")]
    NoTaxonMatch(String),

    /// The API kept failing after retries
    #[error("API exhausted after retries: {0}")]
    ApiExhausted(#[source] GbifError),

    /// Records were fetched (or none existed) but none passed the filters
    #[error("No records survived filtering")]
    NothingSurvived(Box<DownloadReport>),
}

impl From<GbifError> for DownloadError {
    fn from(err: GbifError) -> Self {
        match err {
            GbifError::TaxonNotFound(msg) => DownloadError::NoTaxonMatch(msg),
            other => DownloadError::ApiExhausted(other),
        }
    }
}

/// Runs complete downloads against a [`GbifApi`]
#[derive(Debug)]
pub struct Downloader<A: GbifApi> {
    api: A,
    kingdom: String,
    class_name: Option<String>,
    strict: bool,
    fetch_options: FetchOptions,
    span: Span,
}

impl<A: GbifApi> Downloader<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            kingdom: DEFAULT_KINGDOM.to_string(),
            class_name: None,
            strict: true,
            fetch_options: FetchOptions::default(),
            span: tracing::info_span!("download"),
        }
    }

    pub fn kingdom(mut self, kingdom: impl Into<String>) -> Self {
        self.kingdom = kingdom.into();
        self
    }

    pub fn class_name(mut self, class_name: Option<String>) -> Self {
        self.class_name = class_name;
        self
    }

    /// Reject taxon matches whose rank or name differs from the request
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn taxon_query(&self, config: &FilterConfig) -> TaxonQuery {
        let anchor = config.anchor();
        let mut query = TaxonQuery::new(anchor.name(), anchor.rank())
            .kingdom(self.kingdom.clone())
            .strict(self.strict);
        if let Some(class_name) = &self.class_name {
            query = query.class_name(class_name.clone());
        }
        query
    }

    /// Run one download.
    ///
    /// Resolution failures abort before any occurrence is requested. Failures
    /// inside a year bucket are logged by the fetcher and skipped; only a run
    /// that fetched nothing at all reports [`DownloadError::ApiExhausted`].
    /// Country restrictions are applied client-side by the filter.
    pub async fn run<P, C>(
        &self,
        config: &FilterConfig,
        progress: P,
        cancel: C,
    ) -> Result<DownloadReport, DownloadError>
    where
        P: ProgressObserver,
        C: Fn() -> bool,
    {
        let resolver = TaxonResolver::new(&self.api).with_span(self.span.clone());
        let taxon = resolver.resolve(&self.taxon_query(config)).await?;

        tracing::info!(
            parent: &self.span,
            "Downloading {} records for {} ({}..={})",
            config.basis_of_record().join("/"),
            taxon.canonical_name,
            config.year_start(),
            config.year_end()
        );

        let request = FetchRequest::new(taxon.usage_key, config.year_start(), config.year_end())
            .basis_of_record(config.basis_of_record().to_vec());

        let fetcher = OccurrenceFetcher::new(&self.api)
            .with_options(self.fetch_options)
            .with_span(self.span.clone());
        let mut stream = fetcher.fetch_by_year(request, progress, cancel);

        let mut engine = FilterEngine::new(config.clone());
        let mut records = Vec::new();
        let mut stats = FilterStats::default();

        while let Some(record) = stream.next().await {
            let record = record?;
            let result = engine.apply(&record);
            stats.record(&result);
            if result.keep {
                records.push(KeptRecord {
                    record,
                    uncertainty: result.uncertainty,
                });
            }
        }

        let report = DownloadReport {
            taxon,
            records,
            stats,
            total_estimate: stream.total_estimate().unwrap_or(0),
            cancelled: stream.was_cancelled(),
        };

        tracing::info!(
            parent: &self.span,
            "Kept {} of {} records",
            report.stats.kept,
            report.stats.total
        );

        if report.records.is_empty() {
            return Err(DownloadError::NothingSurvived(Box::new(report)));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{make_match, make_page, make_record};
    use crate::api::MockApi;
    use crate::fetch::{CancellationFlag, FetchProgress, NoProgress};
    use crate::filter::{ReasonCode, UncertaintyStatus};
    use crate::models::{MatchType, OccurrenceRecord, TaxonRank};

    fn nebria_config() -> FilterConfig {
        FilterConfig::builder()
            .genus("Nebria")
            .year_start(2019)
            .year_end(Some(2020))
            .require_elevation(false)
            .build_as_of(2026)
            .unwrap()
    }

    fn nebria_api() -> MockApi {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(1035566, "Nebria", TaxonRank::Genus)));
        api
    }

    #[tokio::test]
    async fn test_run_filters_and_accumulates() {
        let api = nebria_api();
        api.set_count(Ok(4));
        api.push_page(
            Some(2019),
            Ok(make_page(
                vec![
                    make_record(1, Some(2019)),
                    OccurrenceRecord {
                        coordinate_uncertainty: None,
                        ..make_record(2, Some(2019))
                    },
                ],
                true,
            )),
        );
        api.push_page(
            Some(2020),
            Ok(make_page(
                vec![
                    OccurrenceRecord {
                        coordinate_uncertainty: Some(5000.0),
                        ..make_record(3, Some(2020))
                    },
                    make_record(1, Some(2020)),
                    make_record(4, Some(2020)),
                ],
                true,
            )),
        );

        let downloader = Downloader::new(api);
        let report = downloader
            .run(&nebria_config(), NoProgress, || false)
            .await
            .unwrap();

        let keys: Vec<u64> = report.records.iter().map(|k| k.record.key).collect();
        assert_eq!(keys, vec![1, 2, 4]);
        assert_eq!(report.records[1].uncertainty, UncertaintyStatus::Unknown);
        assert_eq!(report.stats.total, 4);
        assert_eq!(report.stats.dropped(ReasonCode::UncertaintyExceeded), 1);
        assert_eq!(report.stats.unknown_uncertainty_kept, 1);
        assert_eq!(report.total_estimate, 4);
        assert_eq!(report.taxon.usage_key, 1035566);
        assert!(!report.cancelled);

        let pages = downloader.api().page_queries();
        assert!(pages.iter().all(|q| q.taxon_key == 1035566));
        assert!(pages
            .iter()
            .all(|q| q.basis_of_record == vec!["PRESERVED_SPECIMEN".to_string()]));
    }

    #[tokio::test]
    async fn test_family_anchor_expects_family_rank() {
        let api = MockApi::new();
        api.set_match_response(Ok(make_match(3, "Carabidae", TaxonRank::Family)));
        api.push_page(Some(2020), Ok(make_page(vec![make_record(1, Some(2020))], true)));

        let config = FilterConfig::builder()
            .family("Carabidae")
            .year_start(2020)
            .year_end(Some(2020))
            .build_as_of(2026)
            .unwrap();

        let downloader = Downloader::new(api).kingdom("Animalia");
        let report = downloader.run(&config, NoProgress, || false).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(downloader.api().name_queries()[0].name, "Carabidae");
    }

    #[tokio::test]
    async fn test_no_taxon_match() {
        let api = MockApi::new();
        api.set_match_response(Ok(TaxonMatch {
            match_type: MatchType::None,
            ..TaxonMatch::default()
        }));

        let downloader = Downloader::new(api);
        let result = downloader.run(&nebria_config(), NoProgress, || false).await;

        assert!(matches!(result, Err(DownloadError::NoTaxonMatch(_))));
        assert!(downloader.api().occurrence_queries().is_empty());
    }

    #[tokio::test]
    async fn test_api_exhausted() {
        let api = nebria_api();
        for year in [2019, 2020] {
            api.push_page(
                Some(year),
                Err(GbifError::RetriesExhausted {
                    attempts: 4,
                    last: Box::new(GbifError::Network("refused".to_string())),
                }),
            );
        }

        let downloader = Downloader::new(api);
        let result = downloader.run(&nebria_config(), NoProgress, || false).await;

        match result {
            Err(DownloadError::ApiExhausted(GbifError::RetriesExhausted { .. })) => {}
            other => panic!("Expected ApiExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_survived_carries_report() {
        let api = nebria_api();
        api.push_page(
            Some(2020),
            Ok(make_page(
                vec![OccurrenceRecord {
                    coordinate_uncertainty: Some(9000.0),
                    ..make_record(1, Some(2020))
                }],
                true,
            )),
        );

        let downloader = Downloader::new(api);
        let result = downloader.run(&nebria_config(), NoProgress, || false).await;

        match result {
            Err(DownloadError::NothingSurvived(report)) => {
                assert_eq!(report.stats.total, 1);
                assert_eq!(report.stats.dropped(ReasonCode::UncertaintyExceeded), 1);
            }
            other => panic!("Expected NothingSurvived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_partial_results() {
        let api = nebria_api();
        api.push_page(Some(2019), Ok(make_page(vec![make_record(1, Some(2019))], true)));
        api.push_page(Some(2020), Ok(make_page(vec![make_record(2, Some(2020))], true)));

        let flag = CancellationFlag::new();
        let trigger = flag.clone();
        let progress = move |_: FetchProgress| trigger.cancel();

        let downloader = Downloader::new(api);
        let report = downloader
            .run(&nebria_config(), progress, flag.checker())
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.records.len(), 1);
        assert_eq!(downloader.api().page_queries().len(), 1);
    }
}
