//! Recording HTTP client for emitter and tracker tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use super::{HttpClient, HttpRequestResult};

/// A request seen by [`MockHttpClient`]
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: String,
    pub row_ids: Vec<i64>,
    pub oversize: bool,
    pub received_at: Instant,
}

type Responder = Box<dyn Fn(&RecordedRequest) -> u16 + Send + Sync>;

/// Answers requests with scripted statuses first, then the responder, then a fixed status.
pub(crate) struct MockHttpClient {
    default_status: u16,
    scripted: Mutex<VecDeque<u16>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    pub fn new(default_status: u16) -> Self {
        Self {
            default_status,
            scripted: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue statuses returned before falling back to the default
    pub fn with_script(self, statuses: &[u16]) -> Self {
        self.scripted.lock().unwrap().extend(statuses.iter().copied());
        self
    }

    /// Pick the status from the request itself
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> u16 + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn respond(&self, request: RecordedRequest) -> HttpRequestResult {
        let scripted = self.scripted.lock().unwrap().pop_front();
        let status = scripted.unwrap_or_else(|| match &self.responder {
            Some(responder) => responder(&request),
            None => self.default_status,
        });
        let result = HttpRequestResult::completed(status, request.row_ids.clone(), request.oversize);
        self.requests.lock().unwrap().push(request);
        result
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn http_get(
        &self,
        url: &str,
        query_string: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult {
        self.respond(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            body: query_string.to_string(),
            row_ids,
            oversize,
            received_at: Instant::now(),
        })
    }

    async fn http_post(
        &self,
        url: &str,
        body: &str,
        row_ids: Vec<i64>,
        oversize: bool,
    ) -> HttpRequestResult {
        self.respond(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            body: body.to_string(),
            row_ids,
            oversize,
            received_at: Instant::now(),
        })
    }
}
