//! Year-bucketed occurrence retrieval.
//!
//! The occurrence search endpoint refuses offsets past a fixed ceiling, so a
//! single paged query cannot reach every record of a large taxon. The fetcher
//! partitions the query by calendar year instead: each year is paged
//! independently from offset zero, which keeps nearly every bucket under the
//! ceiling. A bucket that still reaches it is truncated with a warning.
//!
//! Records are pulled one at a time from an [`OccurrenceStream`]; every
//! network call happens inside [`OccurrenceStream::next`]. Keys seen in
//! earlier buckets are skipped, so each record is yielded at most once per
//! stream.
//!
//! ```rust,no_run
//! use gbif_downloader::api::GbifClient;
//! use gbif_downloader::fetch::{FetchRequest, NoProgress, OccurrenceFetcher};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = GbifClient::new()?;
//! let fetcher = OccurrenceFetcher::new(&client);
//! let request = FetchRequest::new(1035566, 2000, 2020);
//!
//! let mut stream = fetcher.fetch_by_year(request, NoProgress, || false);
//! while let Some(record) = stream.next().await {
//!     println!("{}", record?.key);
//! }
//! # Ok(())
//! # }
//! ```

use futures_util::stream::Stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Span;

use crate::api::{GbifApi, GbifError, OccurrenceQuery, MAX_OFFSET, MAX_PAGE_SIZE};
use crate::filter::DEFAULT_BASIS_OF_RECORD;
use crate::models::OccurrenceRecord;
use crate::utils::{format_number, Deduplicator};

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Backbone usage key from taxon resolution
    pub taxon_key: u64,
    /// First year bucket (inclusive)
    pub year_start: i32,
    /// Last year bucket (inclusive)
    pub year_end: i32,
    /// Record types to request; empty requests every type
    pub basis_of_record: Vec<String>,
    /// Server-side country restriction
    pub country: Option<String>,
    pub has_coordinate: bool,
}

impl FetchRequest {
    pub fn new(taxon_key: u64, year_start: i32, year_end: i32) -> Self {
        Self {
            taxon_key,
            year_start,
            year_end,
            basis_of_record: vec![DEFAULT_BASIS_OF_RECORD.to_string()],
            country: None,
            has_coordinate: true,
        }
    }

    pub fn basis_of_record(mut self, basis: Vec<String>) -> Self {
        self.basis_of_record = basis;
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    fn query(&self, year: Option<i32>) -> OccurrenceQuery {
        let mut query = OccurrenceQuery::new(self.taxon_key);
        query.has_coordinate = self.has_coordinate;
        query.basis_of_record = self.basis_of_record.clone();
        query.country = self.country.clone();
        query.year = year;
        query
    }
}

/// Paging parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Records per page, capped at [`MAX_PAGE_SIZE`]
    pub page_size: u32,
    /// Largest offset requested within one year bucket
    pub offset_ceiling: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            offset_ceiling: MAX_OFFSET,
        }
    }
}

impl FetchOptions {
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }
}

/// Snapshot passed to the progress observer after each yielded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Records yielded so far
    pub fetched: u64,
    /// Count reported by the server for the whole taxon (0 if unknown)
    pub total_estimate: u64,
    /// Year bucket being fetched
    pub year: i32,
}

/// Receives progress updates.
///
/// Called synchronously from [`OccurrenceStream::next`], once per yielded
/// record and never after the stream has finished.
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: FetchProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(FetchProgress),
{
    fn on_progress(&mut self, progress: FetchProgress) {
        self(progress)
    }
}

/// Observer that ignores every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: FetchProgress) {}
}

/// Shared cancellation switch.
///
/// Clones share the same flag; a fetch polls it before each year and each
/// page request.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A predicate suitable for [`OccurrenceFetcher::fetch_by_year`]
    pub fn checker(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let flag = self.0.clone();
        move || flag.load(Ordering::SeqCst)
    }
}

/// Creates year-bucketed occurrence streams
#[derive(Debug)]
pub struct OccurrenceFetcher<'a, A: GbifApi + ?Sized> {
    api: &'a A,
    options: FetchOptions,
    span: Span,
}

impl<'a, A: GbifApi + ?Sized> OccurrenceFetcher<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            options: FetchOptions::default(),
            span: tracing::info_span!("occurrence_fetcher"),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = FetchOptions {
            page_size: options.page_size.clamp(1, MAX_PAGE_SIZE),
            ..options
        };
        self
    }

    /// Attribute this fetcher's events to `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start a lazy, single-pass fetch over `year_start..=year_end`.
    ///
    /// Nothing is requested until the stream is polled. A failure inside a
    /// year is logged and the stream moves on to the next year; if the whole
    /// run yields no record, the last such failure is returned as the final
    /// item. Cancellation ends the stream without an error.
    pub fn fetch_by_year<P, C>(
        &self,
        request: FetchRequest,
        progress: P,
        cancel: C,
    ) -> OccurrenceStream<'a, A, P, C>
    where
        P: ProgressObserver,
        C: Fn() -> bool,
    {
        let request_year_start = request.year_start;
        let current_year = (request.year_start <= request.year_end).then_some(request.year_start);

        OccurrenceStream {
            api: self.api,
            page_size: self.options.page_size,
            offset_ceiling: self.options.offset_ceiling,
            span: self.span.clone(),
            request,
            progress,
            cancel,
            seen: Deduplicator::new(),
            buffer: VecDeque::new(),
            buffer_year: request_year_start,
            current_year,
            offset: 0,
            total_estimate: None,
            yielded: 0,
            duplicates: 0,
            unreadable: 0,
            last_error: None,
            cancelled: false,
            finished: false,
        }
    }
}

/// A pull-based stream of unique occurrence records.
///
/// Dropping it early abandons the fetch; no request is left running.
pub struct OccurrenceStream<'a, A: GbifApi + ?Sized, P, C> {
    api: &'a A,
    page_size: u32,
    offset_ceiling: u64,
    span: Span,
    request: FetchRequest,
    progress: P,
    cancel: C,
    seen: Deduplicator,
    buffer: VecDeque<OccurrenceRecord>,
    /// Year the buffered records were requested for
    buffer_year: i32,
    /// Year being paged; `None` once every bucket is done
    current_year: Option<i32>,
    offset: u64,
    total_estimate: Option<u64>,
    yielded: u64,
    duplicates: u64,
    unreadable: u64,
    last_error: Option<GbifError>,
    cancelled: bool,
    finished: bool,
}

impl<'a, A, P, C> OccurrenceStream<'a, A, P, C>
where
    A: GbifApi + ?Sized,
    P: ProgressObserver,
    C: Fn() -> bool,
{
    /// Get the next record (async).
    ///
    /// Returns `None` when every year bucket is exhausted or the fetch was
    /// cancelled.
    pub async fn next(&mut self) -> Option<Result<OccurrenceRecord, GbifError>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                if !self.seen.check_and_mark(record.key) {
                    self.duplicates += 1;
                    continue;
                }

                self.yielded += 1;
                self.progress.on_progress(FetchProgress {
                    fetched: self.yielded,
                    total_estimate: self.total_estimate.unwrap_or(0),
                    year: self.buffer_year,
                });
                return Some(Ok(record));
            }

            if self.finished {
                return None;
            }

            if self.total_estimate.is_none() {
                self.total_estimate = Some(self.estimate_total().await);
            }

            if !self.fill_buffer().await {
                return self.finish();
            }
        }
    }

    /// Collect every remaining record, stopping at the first error
    pub async fn collect_all(mut self) -> Result<Vec<OccurrenceRecord>, GbifError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record?);
        }
        Ok(records)
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(mut self) -> impl Stream<Item = Result<OccurrenceRecord, GbifError>> + 'a
    where
        P: 'a,
        C: 'a,
    {
        async_stream::stream! {
            while let Some(item) = self.next().await {
                yield item;
            }
        }
    }

    /// Records yielded so far
    pub fn fetched_count(&self) -> u64 {
        self.yielded
    }

    /// Server-reported estimate, once known
    pub fn total_estimate(&self) -> Option<u64> {
        self.total_estimate
    }

    /// Records skipped because their key was already yielded
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates
    }

    /// Page items dropped because they could not be read as records
    pub fn unreadable_skipped(&self) -> u64 {
        self.unreadable
    }

    /// Whether the fetch stopped because cancellation was requested
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether the stream has ended
    pub fn is_done(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    async fn estimate_total(&self) -> u64 {
        match self.api.count_occurrences(&self.request.query(None)).await {
            Ok(total) => {
                tracing::info!(
                    parent: &self.span,
                    "Estimated total: {} records",
                    format_number(total)
                );
                total
            }
            Err(e) => {
                tracing::warn!(parent: &self.span, "Could not estimate total: {}", e);
                0
            }
        }
    }

    /// Fetch pages until at least one record is buffered. Returns `false`
    /// when there is nothing left to fetch.
    async fn fill_buffer(&mut self) -> bool {
        loop {
            let Some(year) = self.current_year else {
                return false;
            };

            if (self.cancel)() {
                tracing::info!(parent: &self.span, "Download stopped by user");
                self.cancelled = true;
                self.current_year = None;
                return false;
            }

            if self.offset == 0 {
                tracing::debug!(parent: &self.span, "Processing year {}", year);
            }

            let limit = u64::from(self.page_size).min(self.offset_ceiling.saturating_sub(self.offset));
            if limit == 0 {
                self.warn_truncated(year, None);
                self.advance_year();
                continue;
            }

            let mut query = self.request.query(Some(year));
            query.offset = self.offset;
            query.limit = limit as u32;

            match self.api.search_occurrences(&query).await {
                Ok(page) => {
                    let received = page.served();
                    self.offset += received;

                    if page.skipped > 0 {
                        tracing::warn!(
                            parent: &self.span,
                            "Skipped {} unreadable records in year {}",
                            page.skipped,
                            year
                        );
                        self.unreadable += page.skipped;
                    }

                    if page.end_of_records || received < limit {
                        self.advance_year();
                    } else if self.offset >= self.offset_ceiling {
                        self.warn_truncated(year, Some(page.count));
                        self.advance_year();
                    }

                    if !page.results.is_empty() {
                        self.buffer_year = year;
                        self.buffer.extend(page.results);
                        return true;
                    }
                }
                Err(e) => {
                    tracing::warn!(parent: &self.span, "Error fetching year {}: {}", year, e);
                    self.last_error = Some(e);
                    self.advance_year();
                }
            }
        }
    }

    fn advance_year(&mut self) {
        self.offset = 0;
        self.current_year = self
            .current_year
            .filter(|year| *year < self.request.year_end)
            .map(|year| year + 1);
    }

    fn warn_truncated(&self, year: i32, reported: Option<u64>) {
        match reported {
            Some(count) if count > self.offset_ceiling => tracing::warn!(
                parent: &self.span,
                "Year {} has {} records but only the first {} can be retrieved; {} records are lost",
                year,
                format_number(count),
                format_number(self.offset_ceiling),
                format_number(count - self.offset_ceiling)
            ),
            _ => tracing::warn!(
                parent: &self.span,
                "Year {} reached the offset limit ({}); later records for this year are lost",
                year,
                format_number(self.offset_ceiling)
            ),
        }
    }

    fn finish(&mut self) -> Option<Result<OccurrenceRecord, GbifError>> {
        self.finished = true;

        tracing::info!(
            parent: &self.span,
            "Fetched {} unique records ({} duplicates skipped)",
            format_number(self.yielded),
            format_number(self.duplicates)
        );

        if self.yielded == 0 {
            if let Some(e) = self.last_error.take() {
                return Some(Err(e));
            }
        }
        None
    }
}

impl<A: GbifApi + ?Sized, P, C> std::fmt::Debug for OccurrenceStream<'_, A, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OccurrenceStream")
            .field("request", &self.request)
            .field("current_year", &self.current_year)
            .field("offset", &self.offset)
            .field("yielded", &self.yielded)
            .field("finished", &self.finished)
            .finish()
    }
}
