//! agenda-core - Core library for agenda
//!
//! This crate contains the shared event models, the SQLite-backed server store,
//! the client-side queue and cache, and the offline synchronization engine used
//! by the API server and the CLI.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sync;
pub mod util;

pub use error::{Error, RemoteError, Result};
pub use models::{Event, EventDraft, EventId, UserId};
