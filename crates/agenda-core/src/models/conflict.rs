//! Sync conflict models

use serde::{Deserialize, Serialize};

use super::event::{Event, EventDraft, EventId};

/// A stale write detected while replaying an update.
///
/// Informational only: the write is still applied (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub event_id: EventId,
    /// The client's payload for the update
    pub local: EventDraft,
    /// The server record as it was before the update was applied
    pub server: Event,
    /// Base timestamp of the client's write (Unix ms)
    pub local_timestamp: i64,
    /// Server record's last modification (Unix ms)
    pub server_timestamp: i64,
}

/// Conflict persisted in the client's conflict log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict row identifier
    pub id: i64,
    pub event_id: EventId,
    pub local_timestamp: i64,
    pub server_timestamp: i64,
    /// Client payload snapshot (JSON)
    pub local_payload: String,
    /// Server payload snapshot (JSON)
    pub server_payload: String,
    /// When the conflict was recorded (Unix ms)
    pub recorded_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
