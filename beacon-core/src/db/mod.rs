//! Database layer for beacon
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The persistent event queue
//! - The single-slot session record

pub mod repo;
pub mod schema;

pub use repo::Database;
