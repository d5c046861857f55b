//! Client session tracking
//!
//! A session is a run of activity without a gap longer than the active
//! timeout. [`ClientSession`] decides on every tracked event whether the
//! current session is still alive, rotates it when it is not, and persists
//! the session record so that the user id and session index survive process
//! restarts.
//!
//! ## State
//!
//! - No prior session: nothing has been tracked since construction (or a
//!   rotation was forced). The next tracked event always starts a session.
//! - Active session: rotates once the gap since the last check exceeds the
//!   foreground or background timeout, whichever applies, or if the clock
//!   moved backwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::store::SessionStore;

/// Schema of the client session context attached to events
pub const CLIENT_SESSION_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/client_session/jsonschema/1-0-1";

/// Storage mechanism reported in the session context
pub const STORAGE_MECHANISM: &str = "SQLITE";

/// Session context attached to a tracked event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub session_id: String,
    pub previous_session_id: Option<String>,
    pub session_index: u64,
    pub storage_mechanism: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_event_timestamp: Option<String>,
    /// Position of the event within its session, starting at 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<u64>,
}

/// Fields that must be present for a stored record to be adopted
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    user_id: String,
    session_id: String,
    session_index: u64,
}

struct SessionState {
    user_id: String,
    current_session_id: String,
    previous_session_id: Option<String>,
    session_index: u64,
    first_event_id: Option<String>,
    first_event_timestamp: Option<String>,
    event_index: u64,
    is_background: bool,
    is_new_session: bool,
    last_session_check_at: i64,
}

impl SessionState {
    fn fresh(now: i64) -> Self {
        Self {
            user_id: uuid::Uuid::new_v4().to_string(),
            current_session_id: String::new(),
            previous_session_id: None,
            session_index: 0,
            first_event_id: None,
            first_event_timestamp: None,
            event_index: 0,
            is_background: false,
            is_new_session: true,
            last_session_check_at: now,
        }
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            user_id: self.user_id.clone(),
            session_id: self.current_session_id.clone(),
            previous_session_id: self.previous_session_id.clone(),
            session_index: self.session_index,
            storage_mechanism: STORAGE_MECHANISM.to_string(),
            first_event_id: self.first_event_id.clone(),
            first_event_timestamp: self.first_event_timestamp.clone(),
            event_index: None,
        }
    }

    fn rotate(&mut self, event_id: &str, event_timestamp_ms: i64) {
        self.is_new_session = false;
        self.previous_session_id = Some(std::mem::take(&mut self.current_session_id))
            .filter(|id| !id.is_empty());
        self.current_session_id = uuid::Uuid::new_v4().to_string();
        self.session_index += 1;
        self.first_event_id = Some(event_id.to_string()).filter(|id| !id.is_empty());
        self.first_event_timestamp = Some(format_timestamp(event_timestamp_ms));
        self.event_index = 0;
    }
}

/// Source of the current time in epoch milliseconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Activity-based session state machine shared by all tracking threads
pub struct ClientSession {
    store: Arc<dyn SessionStore>,
    foreground_timeout: Duration,
    background_timeout: Duration,
    clock: Clock,
    state: Mutex<SessionState>,
    /// Session index of the last record written to the store
    persisted_index: Mutex<u64>,
}

impl ClientSession {
    /// Create a session tracker, resuming the user and session index from `store`.
    ///
    /// A record that cannot be read is deleted and a fresh user id is generated.
    pub fn new(
        store: Arc<dyn SessionStore>,
        foreground_timeout: Duration,
        background_timeout: Duration,
    ) -> Self {
        Self::with_clock(store, foreground_timeout, background_timeout, Arc::new(now_ms))
    }

    /// Like [`ClientSession::new`], reading time from `clock`
    pub fn with_clock(
        store: Arc<dyn SessionStore>,
        foreground_timeout: Duration,
        background_timeout: Duration,
        clock: Clock,
    ) -> Self {
        let mut state = SessionState::fresh(clock());

        match store.get_session() {
            Ok(Some(record)) => match serde_json::from_value::<StoredSession>(record) {
                Ok(stored) => {
                    tracing::debug!(
                        session_index = stored.session_index,
                        "Resuming stored session"
                    );
                    state.user_id = stored.user_id;
                    state.current_session_id = stored.session_id;
                    state.session_index = stored.session_index;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed session record");
                    Self::discard_record(store.as_ref());
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session record");
                Self::discard_record(store.as_ref());
            }
        }

        Self {
            store,
            foreground_timeout,
            background_timeout,
            clock,
            state: Mutex::new(state),
            persisted_index: Mutex::new(0),
        }
    }

    /// Create a session tracker from configuration
    pub fn from_config(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self::new(store, config.foreground_timeout(), config.background_timeout())
    }

    fn discard_record(store: &dyn SessionStore) {
        if let Err(e) = store.delete_session() {
            tracing::error!(error = %e, "Failed to delete session record");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the session context for an event, rotating the session first if it expired.
    ///
    /// `event_timestamp_ms` is the event's own creation time; it becomes the
    /// session's first event timestamp on rotation.
    pub fn update_and_get_session_context(
        &self,
        event_id: &str,
        event_timestamp_ms: i64,
    ) -> SessionContext {
        let (context, rotated) = {
            let mut state = self.lock();

            let rotated = self.should_rotate(&state);
            if rotated {
                state.rotate(event_id, event_timestamp_ms);
                tracing::info!(
                    session_id = %state.current_session_id,
                    session_index = state.session_index,
                    "Started new session"
                );
            }
            state.last_session_check_at = (self.clock)();
            state.event_index += 1;

            let mut context = state.context();
            context.event_index = Some(state.event_index);
            (context, rotated)
        };

        if rotated {
            self.persist(&context);
        }

        context
    }

    /// Write the record unless a newer rotation already reached the store.
    fn persist(&self, context: &SessionContext) {
        let mut persisted_index = self
            .persisted_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if context.session_index <= *persisted_index {
            tracing::debug!(
                session_index = context.session_index,
                persisted_index = *persisted_index,
                "Skipping stale session record"
            );
            return;
        }

        let mut record = context.clone();
        record.event_index = None;
        match serde_json::to_value(&record) {
            Ok(value) => match self.store.set_session(&value) {
                Ok(()) => *persisted_index = context.session_index,
                Err(e) => tracing::error!(error = %e, "Failed to persist session record"),
            },
            Err(e) => tracing::error!(error = %e, "Failed to serialize session record"),
        }
    }

    /// Switch between foreground and background.
    ///
    /// Expiry is checked against the timeout in effect before the switch; an
    /// expired session rotates on the next tracked event.
    pub fn set_is_background(&self, is_background: bool) {
        let mut state = self.lock();

        if self.should_rotate(&state) {
            state.is_new_session = true;
        }
        state.last_session_check_at = (self.clock)();
        state.is_background = is_background;
    }

    pub fn is_background(&self) -> bool {
        self.lock().is_background
    }

    /// Force the next tracked event to start a new session
    pub fn start_new_session(&self) {
        self.lock().is_new_session = true;
    }

    /// Current user id
    pub fn user_id(&self) -> String {
        self.lock().user_id.clone()
    }

    /// Snapshot of the current context without touching the session
    pub fn current_context(&self) -> Option<SessionContext> {
        let state = self.lock();
        if state.current_session_id.is_empty() {
            None
        } else {
            Some(state.context())
        }
    }

    fn should_rotate(&self, state: &SessionState) -> bool {
        if state.is_new_session {
            return true;
        }
        let now = (self.clock)();
        let timeout = if state.is_background {
            self.background_timeout
        } else {
            self.foreground_timeout
        };
        now < state.last_session_check_at
            || (now - state.last_session_check_at) as u128 > timeout.as_millis()
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
