//! # beacon-core
//!
//! Core library for beacon - client-side event instrumentation.
//!
//! This library provides:
//! - A persistent SQLite event queue and session record
//! - Activity-based client sessions that survive restarts
//! - A background emitter with batching, retry backoff and delivery callbacks
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through three stages:
//! - **Track:** the [`Tracker`] completes the event and attaches the session context
//! - **Queue:** the event is persisted in the [`EventStore`] before anything is sent
//! - **Emit:** the [`Emitter`] worker sends batches and deletes resolved rows
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon_core::{Config, Database, Payload, Tracker};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open_and_migrate(&Config::database_path()).expect("failed to open database");
//!
//! let tracker = Tracker::from_config(&config, Arc::new(db)).expect("invalid collector");
//! tracker.start().expect("failed to start emitter");
//!
//! let mut event = Payload::new();
//! event.add("e", "pv");
//! event.add("url", "https://example.com");
//! tracker.track(event).expect("failed to queue event");
//!
//! tracker.flush();
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use emitter::{EmitStatus, EmitStatusMask, Emitter};
pub use error::{Error, Result};
pub use http::{HttpClient, HttpRequestResult, ReqwestHttpClient};
pub use payload::Payload;
pub use registry::TrackerRegistry;
pub use session::{ClientSession, SessionContext};
pub use store::{EventRow, EventStore, SessionStore};
pub use tracker::{Tracker, TrackerSettings};

// Public modules
pub mod config;
pub mod db;
pub mod emitter;
pub mod error;
pub mod http;
pub mod logging;
pub mod payload;
pub mod registry;
pub mod session;
pub mod store;
pub mod tracker;
