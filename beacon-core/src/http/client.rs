//! Default collector client built on reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{Error, Result};

use super::{HttpClient, HttpRequestResult, POST_CONTENT_TYPE};

/// HTTP client for the collector
pub struct ReqwestHttpClient {
    http_client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(POST_CONTENT_TYPE));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            // Each emitter start gets a fresh runtime; idle connections would outlive theirs
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult {
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    tracing::debug!(status = status.as_u16(), rows = row_ids.len(), "Collector rejected request");
                }
                HttpRequestResult::completed(status.as_u16(), row_ids, oversize)
            }
            Err(e) => {
                tracing::warn!(error = %e, rows = row_ids.len(), "HTTP request failed");
                HttpRequestResult::transport_failure(e.to_string(), row_ids, oversize)
            }
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn http_get(
        &self,
        url: &str,
        query_string: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult {
        let full_url = format!("{}?{}", url, query_string);
        self.send(self.http_client.get(full_url), row_ids, oversize)
            .await
    }

    async fn http_post(
        &self,
        url: &str,
        body: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult {
        let request = self.http_client.post(url).body(body.to_string());
        self.send(request, row_ids, oversize).await
    }
}
