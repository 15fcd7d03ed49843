//! # GBIF Downloader
//!
//! Download museum-specimen occurrence records for one genus or family from
//! the GBIF public API and filter them for georeferenced analysis.
//!
//! ## Architecture
//!
//! A run resolves the taxon name, streams occurrences one year at a time,
//! drops duplicates and records that fail the filters, and exports what is
//! left:
//!
//! - [`api`]: The [`GbifApi`] contract, its HTTP client and a scripted mock
//! - [`models`]: Taxon matches and occurrence records
//! - [`taxon`]: Name resolution with strict rank/name validation
//! - [`fetch`]: Year-bucketed, paginated occurrence streaming
//! - [`filter`]: Validated filter configuration and the ordered filter checks
//! - [`download`]: Run orchestration and the failure summary
//! - [`export`]: Excel, CSV and GeoJSON writers
//! - [`config`]: Configuration files and named presets
//! - [`utils`]: Retry with backoff, deduplication, HTTP and text helpers
//! - [`ui`]: Terminal output for the `gbif-download` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use gbif_downloader::{Downloader, FilterConfig, GbifClient, NoProgress};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FilterConfig::builder()
//!     .genus("Nebria")
//!     .year_start(1900)
//!     .countries(["IT", "CH"])
//!     .build()?;
//!
//! let downloader = Downloader::new(GbifClient::new()?);
//! let report = downloader.run(&config, NoProgress, || false).await?;
//! println!("{}", report.stats.summary());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod download;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod models;
pub mod taxon;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use api::{GbifApi, GbifClient, GbifError, MockApi};
pub use config::{ConfigFile, ConfigFileError, PresetStore};
pub use download::{DownloadError, DownloadReport, Downloader};
pub use export::{ExportError, ExportFormat, ExportOptions, Exporter};
pub use fetch::{
    CancellationFlag, FetchOptions, FetchProgress, FetchRequest, NoProgress, OccurrenceFetcher,
    ProgressObserver,
};
pub use filter::{
    filter_records, ConfigError, FilterConfig, FilterEngine, FilterResult, FilterStats,
    KeptRecord, ReasonCode, UncertaintyStatus,
};
pub use models::{MatchType, OccurrencePage, OccurrenceRecord, TaxonMatch, TaxonRank};
pub use taxon::{TaxonQuery, TaxonResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
