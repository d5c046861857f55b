//! Outcome of a single collector request and its retry classification.

use std::collections::HashMap;

/// Status codes that are never retried unless a custom rule says otherwise.
pub const NO_RETRY_STATUS_CODES: [u16; 5] = [400, 401, 403, 410, 422];

/// Result of one HTTP exchange with the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestResult {
    /// Set when the request never produced an HTTP response
    pub transport_error: Option<String>,
    /// HTTP status code; meaningless when `transport_error` is set
    pub status_code: u16,
    /// Event rows carried by the request
    pub row_ids: Vec<i64>,
    /// The request exceeded the byte limit for its method
    pub oversize: bool,
}

impl HttpRequestResult {
    /// A request that received an HTTP response
    pub fn completed(status_code: u16, row_ids: Vec<i64>, oversize: bool) -> Self {
        Self {
            transport_error: None,
            status_code,
            row_ids,
            oversize,
        }
    }

    /// A request that failed before a response arrived
    pub fn transport_failure(error: impl Into<String>, row_ids: Vec<i64>, oversize: bool) -> Self {
        Self {
            transport_error: Some(error.into()),
            status_code: 0,
            row_ids,
            oversize,
        }
    }

    pub fn is_transport_error(&self) -> bool {
        self.transport_error.is_some()
    }

    pub fn is_success(&self) -> bool {
        !self.is_transport_error() && (200..300).contains(&self.status_code)
    }

    /// Whether the carried rows should stay queued for another attempt.
    ///
    /// Oversize requests are never retried: they cannot get smaller.
    pub fn should_retry(&self, custom_rules: &HashMap<u16, bool>) -> bool {
        if self.is_success() || self.oversize {
            return false;
        }

        if self.is_transport_error() {
            return true;
        }

        if let Some(&retry) = custom_rules.get(&self.status_code) {
            return retry;
        }

        self.status_code >= 300 && !NO_RETRY_STATUS_CODES.contains(&self.status_code)
    }
}
