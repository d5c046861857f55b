//! Storage capabilities consumed by the emitter and the client session
//!
//! [`crate::Database`] implements both traits on top of SQLite. Both traits
//! are object safe so stores can be shared as `Arc<dyn EventStore>` and
//! `Arc<dyn SessionStore>`, including the same database behind both.

use crate::error::Result;
use crate::payload::Payload;

/// A queued event and its storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    /// Monotonically increasing row id assigned on insert
    pub id: i64,
    /// The stored event
    pub payload: Payload,
}

/// Durable, ordered, insert-only queue of pending events.
pub trait EventStore: Send + Sync {
    /// Append an event to the queue.
    fn add_event(&self, payload: &Payload) -> Result<()>;

    /// Return up to `limit` of the oldest rows without removing them.
    fn get_event_rows_batch(&self, limit: usize) -> Result<Vec<EventRow>>;

    /// Remove the rows with the given ids. Unknown ids are ignored.
    fn delete_event_rows_with_ids(&self, ids: &[i64]) -> Result<()>;
}

/// Durable single-slot storage for the session record.
pub trait SessionStore: Send + Sync {
    /// Load the stored record, if any.
    fn get_session(&self) -> Result<Option<serde_json::Value>>;

    /// Replace the stored record.
    fn set_session(&self, record: &serde_json::Value) -> Result<()>;

    /// Remove the stored record.
    fn delete_session(&self) -> Result<()>;
}
