//! HTTP implementation of the GBIF API.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::{
    GbifApi, GbifError, NameMatchQuery, OccurrenceQuery, OCCURRENCE_SEARCH_ENDPOINT,
    SPECIES_MATCH_ENDPOINT,
};
use crate::models::{OccurrencePage, TaxonMatch};
use crate::utils::{with_retry, HttpClient, RetryConfig};

/// Public GBIF API base URL
pub const DEFAULT_API_BASE: &str = "https://api.gbif.org/v1";

/// GBIF API client
///
/// Every request goes through [`with_retry`]; one request is in flight at a
/// time, sharing the underlying connection pool.
#[derive(Debug, Clone)]
pub struct GbifClient {
    http: HttpClient,
    base_url: String,
    retry: RetryConfig,
}

impl GbifClient {
    /// Create a client for the public API with default retry settings
    pub fn new() -> Result<Self, GbifError> {
        Ok(Self::with_http(HttpClient::new()?, DEFAULT_API_BASE))
    }

    /// Create a client for a different base URL (mirrors, test servers)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, GbifError> {
        Ok(Self::with_http(HttpClient::new()?, base_url))
    }

    /// Create from an existing HTTP client
    pub fn with_http(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Replace the retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The retry configuration applied to each request
    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Build request URL
    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// GET an endpoint and decode the JSON body, retrying transient failures
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, GbifError> {
        with_retry(self.retry, || self.get_json_once(endpoint, params)).await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, GbifError> {
        let url = self.build_url(endpoint);

        let response = self.http.client().get(&url).query(params).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(GbifError::RateLimit(retry_after));
        }

        if !status.is_success() {
            return Err(GbifError::Http {
                status: status.as_u16(),
                message: format!("GBIF API returned status: {}", status),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl GbifApi for GbifClient {
    async fn match_name(&self, query: &NameMatchQuery) -> Result<TaxonMatch, GbifError> {
        self.get_json(SPECIES_MATCH_ENDPOINT, &query.to_params())
            .await
    }

    async fn search_occurrences(
        &self,
        query: &OccurrenceQuery,
    ) -> Result<OccurrencePage, GbifError> {
        self.get_json(OCCURRENCE_SEARCH_ENDPOINT, &query.to_params())
            .await
    }
}
