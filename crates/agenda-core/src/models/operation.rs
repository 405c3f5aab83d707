//! Offline operation models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{EventDraft, EventId};
use crate::error::{Error, Result};

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse a stored kind. Unknown values are rejected so they surface as
    /// malformed operations instead of being silently reinterpreted.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation kind `{other}`"
            ))),
        }
    }
}

/// A client mutation in its serialized form.
///
/// This is both the row stored in the local queue and the element of a batch
/// sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Locally unique operation id (UUID v7)
    pub id: String,
    pub kind: OperationKind,
    /// Temporary id for creates, server id for updates and deletes
    pub target_id: EventId,
    /// JSON request body for the operation kind
    pub payload: String,
    /// Enqueue timestamp (Unix ms)
    pub timestamp: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeletePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl SyncOperation {
    fn new(kind: OperationKind, target_id: EventId, payload: String, timestamp: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            target_id,
            payload,
            timestamp,
        }
    }

    pub fn create(temp_id: EventId, draft: &EventDraft, timestamp: i64) -> Result<Self> {
        let payload = serde_json::to_string(draft)?;
        Ok(Self::new(OperationKind::Create, temp_id, payload, timestamp))
    }

    pub fn update(event_id: EventId, draft: &EventDraft, timestamp: i64) -> Result<Self> {
        let payload = serde_json::to_string(draft)?;
        Ok(Self::new(OperationKind::Update, event_id, payload, timestamp))
    }

    pub fn delete(event_id: EventId, title: Option<String>, timestamp: i64) -> Result<Self> {
        let payload = serde_json::to_string(&DeletePayload { title })?;
        Ok(Self::new(OperationKind::Delete, event_id, payload, timestamp))
    }

    /// Decode the payload into its typed operation.
    ///
    /// Fails with `InvalidInput` for a missing target id or a payload that does
    /// not match the declared kind.
    pub fn decode(&self) -> Result<PendingOperation> {
        if self.target_id.is_unset() {
            return Err(Error::InvalidInput(format!(
                "operation {} has no target id",
                self.id
            )));
        }

        match self.kind {
            OperationKind::Create => {
                if !self.target_id.is_temporary() {
                    return Err(Error::InvalidInput(format!(
                        "create operation {} must target a temporary id",
                        self.id
                    )));
                }
                Ok(PendingOperation::Create {
                    temp_id: self.target_id,
                    draft: self.decode_draft()?,
                })
            }
            OperationKind::Update => Ok(PendingOperation::Update {
                event_id: self.target_id,
                draft: self.decode_draft()?,
            }),
            OperationKind::Delete => {
                let payload: DeletePayload = if self.payload.trim().is_empty() {
                    DeletePayload::default()
                } else {
                    serde_json::from_str(&self.payload).map_err(|error| {
                        Error::InvalidInput(format!(
                            "malformed delete payload in operation {}: {error}",
                            self.id
                        ))
                    })?
                };
                Ok(PendingOperation::Delete {
                    event_id: self.target_id,
                    title: payload.title,
                })
            }
        }
    }

    fn decode_draft(&self) -> Result<EventDraft> {
        let draft: EventDraft = serde_json::from_str(&self.payload).map_err(|error| {
            Error::InvalidInput(format!(
                "malformed {} payload in operation {}: {error}",
                self.kind.as_str(),
                self.id
            ))
        })?;
        if draft.title.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "operation {} payload has an empty title",
                self.id
            )));
        }
        Ok(draft)
    }
}

/// A decoded mutation, ready to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    Create { temp_id: EventId, draft: EventDraft },
    Update { event_id: EventId, draft: EventDraft },
    Delete { event_id: EventId, title: Option<String> },
}

impl PendingOperation {
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    pub const fn target(&self) -> EventId {
        match self {
            Self::Create { temp_id, .. } => *temp_id,
            Self::Update { event_id, .. } | Self::Delete { event_id, .. } => *event_id,
        }
    }
}

/// A queued operation plus its local bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub operation: SyncOperation,
    /// Failed replay attempts so far
    pub attempts: u32,
}

/// An operation removed from the active queue because it cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: SyncOperation,
    pub attempts: u32,
    pub reason: String,
    /// When the operation was dead-lettered (Unix ms)
    pub failed_at: i64,
}
