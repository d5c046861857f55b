//! HTTP capability used by the emitter to reach the collector
//!
//! The emitter only sees the [`HttpClient`] trait; the concrete client is
//! chosen when the emitter is built. [`ReqwestHttpClient`] is the default.

mod client;
#[cfg(test)]
pub(crate) mod mock;
mod result;

use async_trait::async_trait;

pub use client::ReqwestHttpClient;
pub use result::{HttpRequestResult, NO_RETRY_STATUS_CODES};

/// Content type of POST requests
pub const POST_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Sends prepared requests to the collector.
///
/// Implementations never fail: anything that prevents an HTTP response is
/// reported as a transport failure in the returned result.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url?query_string`
    async fn http_get(
        &self,
        url: &str,
        query_string: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult;

    /// POST `body` as JSON to `url`
    async fn http_post(
        &self,
        url: &str,
        body: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult;
}
