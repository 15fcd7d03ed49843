//! Utility modules supporting the acquisition pipeline.
//!
//! - [`Deduplicator`]: Track occurrence keys already seen during a run
//! - [`HttpClient`]: Shared HTTP client with fixed connect/read timeouts
//! - [`RetryConfig`]: Configuration for retry logic with exponential backoff
//! - [`with_retry`]: Execute an operation with automatic retry on transient errors
//! - [`clean_string_list`]: Normalise user-supplied allow-lists
//! - [`sanitize_filename`]: Make a taxon name safe to use as a filename
//! - [`format_number`]: Render counts with thousands separators
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use gbif_downloader::api::GbifError;
//! use gbif_downloader::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, GbifError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), GbifError> {
//! let config = RetryConfig::default().max_retries(3);
//! let result = with_retry(config, || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod dedup;
mod http;
mod retry;
mod text;

pub use dedup::Deduplicator;
pub use http::{HttpClient, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
pub use retry::{with_retry, RetryConfig, TransientError};
pub use text::{clean_string_list, format_number, sanitize_filename, Case};
