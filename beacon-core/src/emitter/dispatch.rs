//! One dispatch cycle: build requests from queued rows, send them, classify
//! the results, notify callbacks and resolve rows in the store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::Method;
use crate::http::{HttpClient, HttpRequestResult};
use crate::payload::{Payload, EVENT_ID, SENT_TIMESTAMP};
use crate::session::now_ms;
use crate::store::{EventRow, EventStore};

use super::status::{EmitStatus, EmitStatusMask, EmitterCallback};

/// Schema of the POST envelope
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-4";

/// Bytes of `{"schema":"...payload_data...","data":[]}` around the events
const POST_WRAPPER_BYTES: usize = 88;
/// Bytes added to each event by `"stm":"1443452851000"`
const POST_STM_BYTES: usize = 22;

/// Callback and retry settings, frozen while the emitter runs
#[derive(Clone, Default)]
pub(crate) struct DeliverySettings {
    pub callback: Option<EmitterCallback>,
    pub callback_mask: EmitStatusMask,
    pub retry_rules: HashMap<u16, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RequestBody {
    Get(String),
    Post(String),
}

/// A request ready to be handed to the HTTP client
#[derive(Debug, Clone)]
pub(crate) struct OutgoingRequest {
    pub body: RequestBody,
    pub row_ids: Vec<i64>,
    pub oversize: bool,
}

/// Row ids of one cycle partitioned by outcome
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CycleOutcome {
    pub success: Vec<i64>,
    pub will_retry: Vec<i64>,
    pub wont_retry: Vec<i64>,
}

impl CycleOutcome {
    /// Rows that leave the queue this cycle
    pub fn resolved(&self) -> Vec<i64> {
        self.success
            .iter()
            .chain(self.wont_retry.iter())
            .copied()
            .collect()
    }
}

pub(crate) struct Dispatcher {
    pub event_store: Arc<dyn EventStore>,
    pub http_client: Arc<dyn HttpClient>,
    pub url: String,
    pub method: Method,
    pub byte_limit_get: usize,
    pub byte_limit_post: usize,
    pub settings: DeliverySettings,
}

impl Dispatcher {
    /// Run one cycle over `rows` and return how each row was resolved
    pub async fn process_batch(&self, rows: &[EventRow]) -> CycleOutcome {
        let requests = self.build_requests(rows);
        let request_count = requests.len();

        let results = self.send_all(requests).await;
        let outcome = self.classify(results);

        tracing::debug!(
            requests = request_count,
            success = outcome.success.len(),
            will_retry = outcome.will_retry.len(),
            wont_retry = outcome.wont_retry.len(),
            "Dispatch cycle finished"
        );
        if !outcome.wont_retry.is_empty() {
            tracing::warn!(
                rows = outcome.wont_retry.len(),
                "Dropping events that will not be retried"
            );
        }

        self.trigger_callbacks(&outcome, rows);

        let resolved = outcome.resolved();
        if let Err(e) = self.event_store.delete_event_rows_with_ids(&resolved) {
            // Rows stay queued and are sent again next cycle
            tracing::error!(error = %e, rows = resolved.len(), "Failed to delete resolved events");
        }

        outcome
    }

    pub fn build_requests(&self, rows: &[EventRow]) -> Vec<OutgoingRequest> {
        match self.method {
            Method::Get => self.build_get_requests(rows),
            Method::Post => self.build_post_requests(rows),
        }
    }

    fn build_get_requests(&self, rows: &[EventRow]) -> Vec<OutgoingRequest> {
        rows.iter()
            .map(|row| {
                let mut payload = row.payload.clone();
                payload.add(SENT_TIMESTAMP, now_ms().to_string());
                let query_string = payload.to_query_string();
                let oversize = query_string.len() > self.byte_limit_get;
                OutgoingRequest {
                    body: RequestBody::Get(query_string),
                    row_ids: vec![row.id],
                    oversize,
                }
            })
            .collect()
    }

    /// Pack rows greedily into as few POST requests as fit the byte limit.
    fn build_post_requests(&self, rows: &[EventRow]) -> Vec<OutgoingRequest> {
        let limit = self.byte_limit_post;
        let mut requests = Vec::new();

        let mut row_ids: Vec<i64> = Vec::new();
        let mut payloads: Vec<&Payload> = Vec::new();
        let mut total_bytes = 0usize;

        for row in rows {
            let byte_size = row.payload.to_json_string().len() + POST_STM_BYTES;

            if byte_size + POST_WRAPPER_BYTES > limit {
                // Alone over the limit; send it by itself and never retry it
                requests.push(OutgoingRequest {
                    body: RequestBody::Post(build_post_body(&[&row.payload])),
                    row_ids: vec![row.id],
                    oversize: true,
                });
            } else if !payloads.is_empty()
                && total_bytes + byte_size + POST_WRAPPER_BYTES + payloads.len() > limit
            {
                requests.push(OutgoingRequest {
                    body: RequestBody::Post(build_post_body(&payloads)),
                    row_ids: std::mem::take(&mut row_ids),
                    oversize: false,
                });
                payloads.clear();

                row_ids.push(row.id);
                payloads.push(&row.payload);
                total_bytes = byte_size;
            } else {
                row_ids.push(row.id);
                payloads.push(&row.payload);
                total_bytes += byte_size;
            }
        }

        if !payloads.is_empty() {
            requests.push(OutgoingRequest {
                body: RequestBody::Post(build_post_body(&payloads)),
                row_ids,
                oversize: false,
            });
        }

        requests
    }

    /// Send every request concurrently and wait for all of them.
    async fn send_all(&self, requests: Vec<OutgoingRequest>) -> Vec<HttpRequestResult> {
        let mut tasks = JoinSet::new();

        for request in requests {
            let client = Arc::clone(&self.http_client);
            let url = self.url.clone();
            tasks.spawn(async move {
                match request.body {
                    RequestBody::Get(query_string) => {
                        client
                            .http_get(&url, &query_string, request.row_ids, request.oversize)
                            .await
                    }
                    RequestBody::Post(body) => {
                        client
                            .http_post(&url, &body, request.row_ids, request.oversize)
                            .await
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                // The request's rows were never classified, so they stay queued
                Err(e) => tracing::error!(error = %e, "Request task failed"),
            }
        }
        results
    }

    fn classify(&self, results: Vec<HttpRequestResult>) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        for result in results {
            if result.is_success() {
                outcome.success.extend(result.row_ids);
            } else if result.should_retry(&self.settings.retry_rules) {
                outcome.will_retry.extend(result.row_ids);
            } else {
                outcome.wont_retry.extend(result.row_ids);
            }
        }
        outcome
    }

    fn trigger_callbacks(&self, outcome: &CycleOutcome, rows: &[EventRow]) {
        let Some(callback) = &self.settings.callback else {
            return;
        };

        let event_ids: HashMap<i64, &str> = rows
            .iter()
            .filter_map(|row| row.payload.get(EVENT_ID).map(|eid| (row.id, eid)))
            .collect();

        let buckets = [
            (EmitStatus::Success, &outcome.success),
            (EmitStatus::FailedWillRetry, &outcome.will_retry),
            (EmitStatus::FailedWontRetry, &outcome.wont_retry),
        ];

        for (status, row_ids) in buckets {
            if row_ids.is_empty() || !self.settings.callback_mask.contains(status) {
                continue;
            }
            let ids: Vec<String> = row_ids
                .iter()
                .filter_map(|id| event_ids.get(id).map(|eid| eid.to_string()))
                .collect();
            execute_callback(Arc::clone(callback), ids, status);
        }
    }
}

/// Run the callback on a detached thread; a panic there stays there.
fn execute_callback(callback: EmitterCallback, event_ids: Vec<String>, status: EmitStatus) {
    let spawned = std::thread::Builder::new()
        .name("beacon-callback".to_string())
        .spawn(move || callback(event_ids, status));

    if let Err(e) = spawned {
        tracing::error!(error = %e, %status, "Failed to spawn request callback");
    }
}

/// Wrap payloads in the self-describing POST envelope, stamping `stm` on each.
fn build_post_body(payloads: &[&Payload]) -> String {
    let stm = now_ms().to_string();
    let data: Vec<serde_json::Value> = payloads
        .iter()
        .map(|payload| {
            let mut payload = (*payload).clone();
            payload.add(SENT_TIMESTAMP, stm.clone());
            payload.to_json_value()
        })
        .collect();

    serde_json::json!({
        "schema": PAYLOAD_DATA_SCHEMA,
        "data": data,
    })
    .to_string()
}
