//! Batch sync wire types

use serde::{Deserialize, Serialize};

use super::conflict::ConflictInfo;
use super::event::EventId;
use super::operation::SyncOperation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    pub operations: Vec<SyncOperation>,
}

/// Outcome of one operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server id assigned to a created event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
}

impl OperationResult {
    pub fn succeeded(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: true,
            error: None,
            server_id: None,
            conflict: None,
        }
    }

    pub fn failed(operation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            success: false,
            error: Some(error.into()),
            server_id: None,
            conflict: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    pub results: Vec<OperationResult>,
    /// Every conflict detected in the batch
    pub conflicts: Vec<ConflictInfo>,
}
