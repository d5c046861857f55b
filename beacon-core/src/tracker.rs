//! Tracker facade tying the emitter and the client session together

use std::sync::Arc;

use serde_json::json;

use crate::config::{Config, TrackerConfig};
use crate::db::Database;
use crate::emitter::Emitter;
use crate::error::Result;
use crate::payload::{
    Payload, APP_ID, CONTEXTS, DEVICE_TIMESTAMP, EVENT_ID, NAMESPACE, PLATFORM, TRACKER_VERSION,
};
use crate::session::{now_ms, ClientSession, CLIENT_SESSION_SCHEMA};

/// Schema of the envelope wrapping all contexts of an event
pub const CONTEXTS_SCHEMA: &str = "iglu:com.snowplowanalytics.snowplow/contexts/jsonschema/1-0-1";

/// Value of the `tv` field
pub const TRACKER_VERSION_STRING: &str = concat!("beacon-", env!("CARGO_PKG_VERSION"));

/// Fields stamped on every tracked event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub namespace: String,
    pub app_id: String,
    pub platform: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerConfig::default().into()
    }
}

impl From<TrackerConfig> for TrackerSettings {
    fn from(config: TrackerConfig) -> Self {
        Self {
            namespace: config.namespace,
            app_id: config.app_id,
            platform: config.platform,
        }
    }
}

/// Records events: completes them, attaches the session and queues them.
pub struct Tracker {
    emitter: Emitter,
    session: Option<ClientSession>,
    settings: TrackerSettings,
}

impl Tracker {
    pub fn new(emitter: Emitter, session: Option<ClientSession>, settings: TrackerSettings) -> Self {
        Self {
            emitter,
            session,
            settings,
        }
    }

    /// Build the default stack on one database: SQLite queue and session
    /// record, reqwest client, session tracking when enabled.
    pub fn from_config(config: &Config, db: Arc<Database>) -> Result<Self> {
        let emitter = Emitter::new(db.clone(), &config.network, &config.emitter)?;
        let session = config
            .session
            .enabled
            .then(|| ClientSession::from_config(db, &config.session));

        Ok(Self::new(emitter, session, config.tracker.clone().into()))
    }

    /// Complete and queue an event; returns its event id.
    pub fn track(&self, mut payload: Payload) -> Result<String> {
        if !payload.contains_key(EVENT_ID) {
            payload.add(EVENT_ID, uuid::Uuid::new_v4().to_string());
        }
        let timestamp_ms = match payload.get(DEVICE_TIMESTAMP).map(str::parse::<i64>) {
            Some(Ok(ms)) => ms,
            _ => {
                let ms = now_ms();
                payload.add(DEVICE_TIMESTAMP, ms.to_string());
                ms
            }
        };

        payload.add(TRACKER_VERSION, TRACKER_VERSION_STRING);
        payload.add(NAMESPACE, self.settings.namespace.as_str());
        payload.add(APP_ID, self.settings.app_id.as_str());
        payload.add(PLATFORM, self.settings.platform.as_str());

        // Present by construction above
        let event_id = payload.get(EVENT_ID).unwrap_or_default().to_string();

        if let Some(session) = &self.session {
            let context = session.update_and_get_session_context(&event_id, timestamp_ms);
            let contexts = json!({
                "schema": CONTEXTS_SCHEMA,
                "data": [{
                    "schema": CLIENT_SESSION_SCHEMA,
                    "data": context,
                }],
            });
            payload.add(CONTEXTS, contexts.to_string());
        }

        self.emitter.add(&payload)?;
        tracing::trace!(event_id = %event_id, "Event tracked");
        Ok(event_id)
    }

    pub fn start(&self) -> Result<()> {
        self.emitter.start()
    }

    pub fn stop(&self) {
        self.emitter.stop();
    }

    /// Deliver everything queued, then stop the emitter
    pub fn flush(&self) {
        self.emitter.flush();
    }

    /// Switch the session between foreground and background; no-op without a session
    pub fn set_is_background(&self, is_background: bool) {
        if let Some(session) = &self.session {
            session.set_is_background(is_background);
        }
    }

    /// Force the next event into a new session; no-op without a session
    pub fn start_new_session(&self) {
        if let Some(session) = &self.session {
            session.start_new_session();
        }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmitterConfig, NetworkConfig};
    use crate::http::mock::MockHttpClient;
    use std::time::Duration;

    fn create_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    fn create_tracker(db: Arc<Database>, with_session: bool) -> Tracker {
        let emitter = Emitter::with_http_client(
            db.clone(),
            &NetworkConfig::new("collector.test"),
            &EmitterConfig::default(),
            Arc::new(MockHttpClient::new(200)),
        )
        .unwrap();
        let session = with_session.then(|| {
            ClientSession::new(db, Duration::from_secs(1800), Duration::from_secs(1800))
        });
        let settings = TrackerSettings {
            namespace: "ns".to_string(),
            app_id: "app".to_string(),
            platform: "srv".to_string(),
        };
        Tracker::new(emitter, session, settings)
    }

    fn page_view() -> Payload {
        [("e", "pv"), ("url", "https://example.com")].into_iter().collect()
    }

    #[test]
    fn test_track_completes_event() {
        let db = create_db();
        let tracker = create_tracker(db.clone(), false);

        let event_id = tracker.track(page_view()).unwrap();

        let rows = db.get_all_event_rows().unwrap();
        assert_eq!(rows.len(), 1);
        let payload = &rows[0].payload;
        assert_eq!(payload.get("eid"), Some(event_id.as_str()));
        assert_eq!(payload.get("tna"), Some("ns"));
        assert_eq!(payload.get("aid"), Some("app"));
        assert_eq!(payload.get("p"), Some("srv"));
        assert_eq!(payload.get("tv"), Some(TRACKER_VERSION_STRING));
        assert!(payload.get("dtm").unwrap().parse::<i64>().is_ok());
        assert!(!payload.contains_key("co"));
    }

    #[test]
    fn test_track_keeps_caller_ids() {
        let db = create_db();
        let tracker = create_tracker(db.clone(), false);

        let mut payload = page_view();
        payload.add("eid", "custom-id");
        payload.add("dtm", "1700000000000");

        assert_eq!(tracker.track(payload).unwrap(), "custom-id");
        let rows = db.get_all_event_rows().unwrap();
        assert_eq!(rows[0].payload.get("dtm"), Some("1700000000000"));
    }

    #[test]
    fn test_track_attaches_session_context() {
        let db = create_db();
        let tracker = create_tracker(db.clone(), true);

        let first = tracker.track(page_view()).unwrap();
        tracker.track(page_view()).unwrap();

        let rows = db.get_all_event_rows().unwrap();
        let contexts: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| serde_json::from_str(row.payload.get("co").unwrap()).unwrap())
            .collect();

        assert_eq!(contexts[0]["schema"], CONTEXTS_SCHEMA);
        let session = &contexts[0]["data"][0];
        assert_eq!(session["schema"], CLIENT_SESSION_SCHEMA);
        assert_eq!(session["data"]["sessionIndex"], 1);
        assert_eq!(session["data"]["firstEventId"], first.as_str());
        assert_eq!(session["data"]["eventIndex"], 1);

        let second = &contexts[1]["data"][0]["data"];
        assert_eq!(second["sessionId"], session["data"]["sessionId"]);
        assert_eq!(second["eventIndex"], 2);
    }

    #[test]
    fn test_start_new_session_rotates_on_next_event() {
        let db = create_db();
        let tracker = create_tracker(db, true);

        tracker.track(page_view()).unwrap();
        let before = tracker.session().unwrap().current_context().unwrap();

        tracker.start_new_session();
        tracker.track(page_view()).unwrap();
        let after = tracker.session().unwrap().current_context().unwrap();

        assert_eq!(after.session_index, before.session_index + 1);
        assert_eq!(after.previous_session_id, Some(before.session_id));
    }

    #[test]
    fn test_session_calls_without_session_are_noops() {
        let tracker = create_tracker(create_db(), false);
        tracker.set_is_background(true);
        tracker.start_new_session();
        assert!(tracker.session().is_none());
    }

    #[test]
    fn test_from_config_requires_collector() {
        let result = Tracker::from_config(&Config::default(), create_db());
        assert!(matches!(
            result,
            Err(crate::error::Error::InvalidCollectorUrl(_))
        ));
    }

    #[test]
    fn test_from_config_honours_session_switch() {
        let mut config = Config::default();
        config.network = NetworkConfig::new("collector.test");
        config.session.enabled = false;

        let tracker = Tracker::from_config(&config, create_db()).unwrap();
        assert!(tracker.session().is_none());
        assert_eq!(tracker.settings().namespace, "beacon");
    }
}
