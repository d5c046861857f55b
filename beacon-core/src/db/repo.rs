//! Database repository layer
//!
//! Provides the event queue and session record operations.

use crate::error::Result;
use crate::payload::Payload;
use crate::store::{EventRow, EventStore, SessionStore};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Database handle (single connection guarded by a mutex)
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps inserts from the caller thread off the emitter's reads
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.clone()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Open a database and bring its schema up to date
    pub fn open_and_migrate(path: &PathBuf) -> Result<Self> {
        let db = Self::open(path)?;
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Path of the backing file, `None` for in-memory databases
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Event queue operations
    // ============================================

    /// Insert an event and return its row id
    pub fn insert_event(&self, payload: &Payload) -> Result<i64> {
        let data = serde_json::to_string(payload)?;
        let conn = self.connection();
        conn.execute(
            "INSERT INTO events (payload, created_at) VALUES (?1, ?2)",
            params![data, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get up to `limit` oldest events
    pub fn get_event_batch(&self, limit: usize) -> Result<Vec<EventRow>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT id, payload FROM events ORDER BY id ASC LIMIT ?1")?;
        let rows = stmt
            .query_map([limit as i64], Self::row_to_event_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get every queued event, oldest first
    pub fn get_all_event_rows(&self) -> Result<Vec<EventRow>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT id, payload FROM events ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], Self::row_to_event_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete events by id, returning the number of rows removed
    pub fn delete_events(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders);

        let conn = self.connection();
        let deleted = conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(deleted)
    }

    /// Remove every queued event
    pub fn delete_all_event_rows(&self) -> Result<usize> {
        let conn = self.connection();
        Ok(conn.execute("DELETE FROM events", [])?)
    }

    /// Number of queued events
    pub fn count_event_rows(&self) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_event_row(row: &Row) -> rusqlite::Result<EventRow> {
        let id: i64 = row.get(0)?;
        let data: String = row.get(1)?;
        let payload = serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(EventRow { id, payload })
    }

    // ============================================
    // Session record operations
    // ============================================

    /// Load the raw session record text
    pub fn get_session_data(&self) -> Result<Option<String>> {
        let conn = self.connection();
        let data = conn
            .query_row("SELECT data FROM session WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(data)
    }

    /// Replace the session record
    pub fn upsert_session_data(&self, data: &str) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO session (id, data, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![data, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove the session record
    pub fn delete_session_data(&self) -> Result<()> {
        let conn = self.connection();
        conn.execute("DELETE FROM session", [])?;
        Ok(())
    }
}

impl EventStore for Database {
    fn add_event(&self, payload: &Payload) -> Result<()> {
        let id = self.insert_event(payload)?;
        tracing::trace!(row_id = id, "Event queued");
        Ok(())
    }

    fn get_event_rows_batch(&self, limit: usize) -> Result<Vec<EventRow>> {
        self.get_event_batch(limit)
    }

    fn delete_event_rows_with_ids(&self, ids: &[i64]) -> Result<()> {
        self.delete_events(ids)?;
        Ok(())
    }
}

impl SessionStore for Database {
    fn get_session(&self) -> Result<Option<serde_json::Value>> {
        match self.get_session_data()? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn set_session(&self, record: &serde_json::Value) -> Result<()> {
        self.upsert_session_data(&record.to_string())
    }

    fn delete_session(&self) -> Result<()> {
        self.delete_session_data()
    }
}
