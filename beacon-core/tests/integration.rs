//! End-to-end tests: tracker, SQLite queue and a real HTTP collector
//!
//! A wiremock server stands in for the collector; the emitter reaches it over
//! the default reqwest client.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use beacon_core::config::{Config, Method, NetworkConfig, Protocol};
use beacon_core::emitter::PAYLOAD_DATA_SCHEMA;
use beacon_core::{logging, Database, EmitStatus, EmitStatusMask, Payload, Tracker};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn network_for(server: &MockServer, method: Method) -> NetworkConfig {
    let host = server.uri().trim_start_matches("http://").to_string();
    let mut network = NetworkConfig::new(host);
    network.protocol = Protocol::Http;
    network.method = method;
    network.timeout_secs = 5;
    network
}

fn open_db(dir: &TempDir) -> Arc<Database> {
    let path = dir.path().join("events.db");
    Arc::new(Database::open_and_migrate(&path).expect("failed to open database"))
}

fn screen_view(name: &str) -> Payload {
    [("e", "ue"), ("name", name)].into_iter().collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tracked_events_reach_collector_via_post() {
    logging::init_test();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/com.snowplowanalytics.snowplow/tp2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let mut config = Config::default();
    config.network = network_for(&server, Method::Post);

    let tracker = Arc::new(Tracker::from_config(&config, db.clone()).unwrap());
    let first = tracker.track(screen_view("home")).unwrap();
    let second = tracker.track(screen_view("settings")).unwrap();
    assert_eq!(db.count_event_rows().unwrap(), 2);

    let worker = Arc::clone(&tracker);
    tokio::task::spawn_blocking(move || {
        worker.start().unwrap();
        worker.flush();
    })
    .await
    .unwrap();

    assert_eq!(db.count_event_rows().unwrap(), 0);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["schema"], PAYLOAD_DATA_SCHEMA);

    let events = body["data"].as_array().unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e["eid"].as_str().unwrap()).collect();
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));
    assert!(events.iter().all(|e| e["stm"].is_string() && e["co"].is_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_delivery_and_callbacks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/i"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let mut config = Config::default();
    config.network = network_for(&server, Method::Get);
    config.session.enabled = false;

    let tracker = Arc::new(Tracker::from_config(&config, db.clone()).unwrap());

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    tracker
        .emitter()
        .set_request_callback(
            move |ids, status| {
                tx.lock().unwrap().send((ids, status)).unwrap();
            },
            EmitStatusMask::ALL,
        )
        .unwrap();

    let mut tracked = Vec::new();
    for name in ["a", "b", "c"] {
        tracked.push(tracker.track(screen_view(name)).unwrap());
    }

    let worker = Arc::clone(&tracker);
    tokio::task::spawn_blocking(move || {
        worker.start().unwrap();
        worker.flush();
    })
    .await
    .unwrap();

    let (mut ids, status) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, EmitStatus::Success);
    ids.sort();
    tracked.sort();
    assert_eq!(ids, tracked);

    let received = server.received_requests().await.unwrap();
    assert!(received
        .iter()
        .all(|r| r.url.query_pairs().any(|(k, _)| k == "stm")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_events_are_dropped_and_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let mut config = Config::default();
    config.network = network_for(&server, Method::Post);

    let tracker = Arc::new(Tracker::from_config(&config, db.clone()).unwrap());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    tracker
        .emitter()
        .set_request_callback(
            move |ids, status| {
                tx.lock().unwrap().send((ids, status)).unwrap();
            },
            EmitStatusMask::FAILURES,
        )
        .unwrap();

    let event_id = tracker.track(screen_view("home")).unwrap();

    let worker = Arc::clone(&tracker);
    tokio::task::spawn_blocking(move || {
        worker.start().unwrap();
        worker.flush();
    })
    .await
    .unwrap();

    let (ids, status) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, EmitStatus::FailedWontRetry);
    assert_eq!(ids, vec![event_id]);
    assert_eq!(db.count_event_rows().unwrap(), 0);
}

#[test]
fn test_queue_and_session_survive_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    // Nothing is sent: the emitter is never started
    config.network = NetworkConfig::new("localhost:9");

    let first_session = {
        let tracker = Tracker::from_config(&config, open_db(&dir)).unwrap();
        tracker.track(screen_view("home")).unwrap();
        tracker.session().unwrap().current_context().unwrap()
    };

    let db = open_db(&dir);
    assert_eq!(db.count_event_rows().unwrap(), 1);

    let tracker = Tracker::from_config(&config, db.clone()).unwrap();
    let session = tracker.session().unwrap();
    assert_eq!(session.user_id(), first_session.user_id);

    // A new process starts a new session continuing the index
    tracker.track(screen_view("settings")).unwrap();
    let resumed = session.current_context().unwrap();
    assert_eq!(resumed.session_index, first_session.session_index + 1);
    assert_eq!(resumed.previous_session_id, Some(first_session.session_id));
    assert_eq!(db.count_event_rows().unwrap(), 2);
}
