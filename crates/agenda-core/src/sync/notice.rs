//! Client-side notifications

use crate::models::{ConflictInfo, DeletedEvent, Event};

use super::connectivity::ConnectivityState;

pub const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Something a client UI may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    Connectivity(ConnectivityState),
    /// Human-readable sync summary
    Status(String),
    /// Operations still waiting in the queue
    PendingCount(usize),
    /// New event from another client
    EventAdded(Event),
    /// Event changed by another client
    EventChanged(Event),
    /// Event deleted by another client
    EventRemoved(DeletedEvent),
    /// Stale writes detected during the last sync
    Conflicts(Vec<ConflictInfo>),
}
