//! Last-write-wins conflict policy

use crate::models::{ConflictInfo, Event, EventDraft, EventId};

/// Outcome of comparing a write's base timestamp with the server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Conflict,
    NoConflict,
}

impl Verdict {
    pub const fn is_conflict(self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Timestamp comparison used when replaying updates.
///
/// A conflict is advisory: the write is applied either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictPolicy;

impl ConflictPolicy {
    /// `Conflict` iff the server record changed after the client's base
    /// timestamp. Ties favor the incoming write.
    pub const fn evaluate(local_base: i64, server_last_modified: i64) -> Verdict {
        if server_last_modified > local_base {
            Verdict::Conflict
        } else {
            Verdict::NoConflict
        }
    }

    /// Evaluate an update against the current server record and build the
    /// conflict report when it is stale.
    pub fn check_update(
        event_id: EventId,
        local: &EventDraft,
        local_timestamp: i64,
        server: &Event,
    ) -> Option<ConflictInfo> {
        let server_timestamp = server.last_modified();
        Self::evaluate(local_timestamp, server_timestamp)
            .is_conflict()
            .then(|| ConflictInfo {
                event_id,
                local: local.clone(),
                server: server.clone(),
                local_timestamp,
                server_timestamp,
            })
    }
}
