//! Data models for agenda

mod conflict;
mod event;
mod notification;
mod operation;
mod protocol;

pub use conflict::{ConflictInfo, ConflictRecord};
pub use event::{
    Event, EventDraft, EventId, EventStatus, EventType, Invitation, UserId, Visibility,
    DEFAULT_EVENT_COLOR, MAX_TITLE_LEN,
};
pub use notification::{DeletedEvent, PushMessage};
pub use operation::{DeadLetter, OperationKind, PendingOperation, QueuedOperation, SyncOperation};
pub use protocol::{BatchSyncRequest, BatchSyncResponse, OperationResult};
