//! Database layer for agenda
//!
//! The server keeps the authoritative [`EventStore`]; clients keep a
//! [`LocalStore`] holding the pending-operation queue, the offline event
//! cache and the conflict log. Both sit on `SQLite`.

mod connection;
mod event_store;
mod local_store;
mod migrations;

pub use connection::{Database, Schema};
pub use event_store::{EventStore, NewEvent, SqliteEventStore};
pub use local_store::{ConflictLog, LocalStore, OfflineCache, SqliteLocalStore, SyncQueue};
