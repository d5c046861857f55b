//! Background delivery of queued events to the collector
//!
//! The [`Emitter`] owns a worker thread that repeatedly reads a batch of rows
//! from the [`EventStore`], sends them, and deletes the rows that were
//! delivered or will never be delivered. Rows that failed with a retryable
//! status stay queued and the worker backs off before the next cycle.
//!
//! ```text
//!   add() ──► EventStore ──► worker: fetch batch ─► send ─► classify ─► delete
//!                 ▲                                                  │
//!                 └──────────── retryable rows stay ◄────────────────┘
//! ```

mod dispatch;
mod retry_delay;
mod status;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::{EmitterConfig, Method, NetworkConfig};
use crate::error::{Error, Result};
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::payload::Payload;
use crate::store::EventStore;

use dispatch::{DeliverySettings, Dispatcher};

pub use dispatch::PAYLOAD_DATA_SCHEMA;
pub use retry_delay::RetryDelay;
pub use status::{EmitStatus, EmitStatusMask, EmitterCallback};

/// How long an idle worker sleeps before polling the store again
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Control {
    running: bool,
    /// Incremented by every flush call
    flush_requests: u64,
    /// Highest flush ticket known to be drained
    drained_upto: u64,
}

/// State shared between the emitter handle and its worker
struct Shared {
    event_store: Arc<dyn EventStore>,
    control: Mutex<Control>,
    drained: Condvar,
    wake: Notify,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.control().running
    }

    fn mark_drained(&self, ticket: u64) {
        let mut control = self.control();
        if ticket > control.drained_upto {
            control.drained_upto = ticket;
        }
        drop(control);
        self.drained.notify_all();
    }
}

/// A running worker thread and the signal that interrupts its waits.
///
/// Each run gets its own stop signal so a permit left by one `stop` never
/// reaches the next run.
struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

/// Clears the running flag when the worker exits for any reason.
struct WorkerExit(Arc<Shared>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.0.control().running = false;
        self.0.drained.notify_all();
    }
}

/// Delivers events from a persistent queue to a collector.
///
/// Settings (request callback, retry rules) can only be changed while the
/// emitter is stopped; the worker reads them once when it starts.
pub struct Emitter {
    shared: Arc<Shared>,
    http_client: Arc<dyn HttpClient>,
    url: String,
    method: Method,
    batch_size: usize,
    byte_limit_get: usize,
    byte_limit_post: usize,
    settings: Mutex<DeliverySettings>,
    worker: Mutex<Option<Worker>>,
}

impl Emitter {
    /// Create an emitter that sends with [`ReqwestHttpClient`].
    ///
    /// Fails with [`Error::InvalidCollectorUrl`] when the collector is missing
    /// or malformed, or with a config error for invalid emitter settings.
    pub fn new(
        event_store: Arc<dyn EventStore>,
        network: &NetworkConfig,
        config: &EmitterConfig,
    ) -> Result<Self> {
        let client = ReqwestHttpClient::new(network.timeout())?;
        Self::with_http_client(event_store, network, config, Arc::new(client))
    }

    /// Create an emitter that sends through a caller-supplied client
    pub fn with_http_client(
        event_store: Arc<dyn EventStore>,
        network: &NetworkConfig,
        config: &EmitterConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let url = network.collector_url()?;
        config.validate()?;

        let settings = DeliverySettings {
            retry_rules: config
                .retry_rules
                .iter()
                .map(|rule| (rule.status, rule.retry))
                .collect(),
            ..Default::default()
        };

        tracing::debug!(url = %url, method = ?network.method, "Emitter created");

        Ok(Self {
            shared: Arc::new(Shared {
                event_store,
                control: Mutex::new(Control::default()),
                drained: Condvar::new(),
                wake: Notify::new(),
            }),
            http_client,
            url,
            method: network.method,
            batch_size: config.batch_size,
            byte_limit_get: config.byte_limit_get,
            byte_limit_post: config.byte_limit_post,
            settings: Mutex::new(settings),
            worker: Mutex::new(None),
        })
    }

    /// Full collector URL requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Start the worker. Does nothing if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        {
            let mut control = self.shared.control();
            if control.running {
                return Ok(());
            }
            control.running = true;
        }

        match self.spawn_worker() {
            Ok(started) => {
                *worker = Some(started);
                tracing::info!(url = %self.url, "Emitter started");
                Ok(())
            }
            Err(e) => {
                self.shared.control().running = false;
                Err(e)
            }
        }
    }

    fn spawn_worker(&self) -> Result<Worker> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let dispatcher = Dispatcher {
            event_store: Arc::clone(&self.shared.event_store),
            http_client: Arc::clone(&self.http_client),
            url: self.url.clone(),
            method: self.method,
            byte_limit_get: self.byte_limit_get,
            byte_limit_post: self.byte_limit_post,
            settings: self.lock_settings().clone(),
        };
        let shared = Arc::clone(&self.shared);
        let stop = Arc::new(Notify::new());
        let worker_stop = Arc::clone(&stop);
        let batch_size = self.batch_size;

        let handle = std::thread::Builder::new()
            .name("beacon-emitter".to_string())
            .spawn(move || {
                let _exit = WorkerExit(Arc::clone(&shared));
                runtime.block_on(run(shared, worker_stop, dispatcher, batch_size));
            })?;
        Ok(Worker { handle, stop })
    }

    /// Stop the worker and wait for its current cycle to finish.
    ///
    /// A cycle in progress completes; a pending backoff is cut short.
    pub fn stop(&self) {
        let mut worker = self.lock_worker();
        {
            let mut control = self.shared.control();
            if !control.running {
                return;
            }
            control.running = false;
        }
        self.shared.drained.notify_all();

        if let Some(Worker { handle, stop }) = worker.take() {
            stop.notify_one();
            if handle.join().is_err() {
                tracing::error!("Emitter worker panicked");
            }
        }
        tracing::info!("Emitter stopped");
    }

    /// Block until the worker finds the queue empty, then stop it.
    ///
    /// Returns immediately when the emitter is not running. Rows that keep
    /// failing with retryable statuses keep this call waiting.
    pub fn flush(&self) {
        {
            let mut control = self.shared.control();
            if !control.running {
                return;
            }
            control.flush_requests += 1;
            let ticket = control.flush_requests;
            self.shared.wake.notify_one();

            tracing::debug!(ticket, "Waiting for event queue to drain");
            let _control = self
                .shared
                .drained
                .wait_while(control, |c| c.running && c.drained_upto < ticket)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.stop();
    }

    /// Queue an event for delivery and wake the worker
    pub fn add(&self, payload: &Payload) -> Result<()> {
        self.shared.event_store.add_event(payload)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Register a callback for the delivery outcomes selected by `mask`
    pub fn set_request_callback<F>(&self, callback: F, mask: impl Into<EmitStatusMask>) -> Result<()>
    where
        F: Fn(Vec<String>, EmitStatus) + Send + Sync + 'static,
    {
        let _control = self.stopped_control()?;
        let mut settings = self.lock_settings();
        settings.callback = Some(Arc::new(callback));
        settings.callback_mask = mask.into();
        Ok(())
    }

    /// Override whether a failure status is retried.
    ///
    /// Only status codes of 300 and above can be overridden.
    pub fn set_custom_retry_rule(&self, status_code: u16, retry: bool) -> Result<()> {
        let _control = self.stopped_control()?;
        if status_code < 300 {
            return Err(Error::InvalidRetryRule(status_code));
        }
        self.lock_settings().retry_rules.insert(status_code, retry);
        Ok(())
    }

    /// Current custom retry rules
    pub fn custom_retry_rules(&self) -> HashMap<u16, bool> {
        self.lock_settings().retry_rules.clone()
    }

    /// Holds the control lock so the emitter cannot start mid-update.
    fn stopped_control(&self) -> Result<MutexGuard<'_, Control>> {
        let control = self.shared.control();
        if control.running {
            return Err(Error::EmitterRunning);
        }
        Ok(control)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_settings(&self) -> MutexGuard<'_, DeliverySettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop: one dispatch cycle per iteration until stopped.
async fn run(shared: Arc<Shared>, stop: Arc<Notify>, dispatcher: Dispatcher, batch_size: usize) {
    let mut retry_delay = RetryDelay::default();

    loop {
        // Flushes requested before this fetch are satisfied if it comes back empty
        let ticket = shared.control().flush_requests;

        match shared.event_store.get_event_rows_batch(batch_size) {
            Ok(rows) if rows.is_empty() => {
                shared.mark_drained(ticket);
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = stop.notified() => {}
                    _ = tokio::time::sleep(IDLE_TIMEOUT) => {}
                }
            }
            Ok(rows) => {
                let outcome = dispatcher.process_batch(&rows).await;

                if outcome.will_retry.is_empty() {
                    retry_delay.wont_retry();
                } else {
                    retry_delay.will_retry();
                }

                let delay = retry_delay.get();
                if !delay.is_zero() {
                    tracing::debug!(
                        delay_ms = delay.as_millis() as u64,
                        retry_count = retry_delay.retry_count(),
                        "Backing off before next dispatch"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.notified() => {}
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read event batch");
                tokio::select! {
                    _ = stop.notified() => {}
                    _ = tokio::time::sleep(IDLE_TIMEOUT) => {}
                }
            }
        }

        if !shared.is_running() {
            break;
        }
    }
}
