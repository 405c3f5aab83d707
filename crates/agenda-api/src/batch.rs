//! Replay of a client's offline queue in one request.

use std::collections::HashMap;

use agenda_core::db::{EventStore, NewEvent};
use agenda_core::models::{
    BatchSyncResponse, EventDraft, EventId, OperationResult, PendingOperation, SyncOperation,
};
use agenda_core::sync::ConflictPolicy;
use agenda_core::util::user_fingerprint;
use agenda_core::{Error, UserId};

use crate::fanout::NotificationFanout;

/// Apply `operations` for `user_id` in ascending timestamp order.
///
/// Every operation gets its own result; one failure never stops the rest.
/// Updates and deletes that target a temporary id created earlier in the same
/// batch are applied to the id the server assigned.
pub async fn apply_batch(
    store: &dyn EventStore,
    fanout: &NotificationFanout,
    user_id: UserId,
    mut operations: Vec<SyncOperation>,
) -> BatchSyncResponse {
    // Stable, so equal timestamps keep the client's order.
    operations.sort_by_key(|operation| operation.timestamp);

    let mut created: HashMap<EventId, EventId> = HashMap::new();
    let mut response = BatchSyncResponse::default();

    for operation in operations {
        let result = match operation.decode() {
            Ok(decoded) => {
                apply_one(store, fanout, user_id, &operation, decoded, &mut created).await
            }
            Err(error) => {
                tracing::warn!(
                    operation_id = %operation.id,
                    user = user_fingerprint(user_id),
                    %error,
                    "Rejected malformed batch operation"
                );
                OperationResult::failed(&operation.id, error.to_string())
            }
        };
        if let Some(conflict) = &result.conflict {
            response.conflicts.push(conflict.clone());
        }
        response.results.push(result);
    }

    let failed = response.results.iter().filter(|result| !result.success).count();
    tracing::info!(
        user = user_fingerprint(user_id),
        operations = response.results.len(),
        failed,
        conflicts = response.conflicts.len(),
        "Applied batch sync"
    );
    response
}

async fn apply_one(
    store: &dyn EventStore,
    fanout: &NotificationFanout,
    user_id: UserId,
    operation: &SyncOperation,
    decoded: PendingOperation,
    created: &mut HashMap<EventId, EventId>,
) -> OperationResult {
    let outcome = match decoded {
        PendingOperation::Create { temp_id, draft } => {
            create(store, fanout, user_id, operation, temp_id, draft, created).await
        }
        PendingOperation::Update { event_id, draft } => match resolve_target(event_id, created) {
            Ok(target) => update(store, fanout, user_id, operation, target, draft).await,
            Err(error) => Err(error),
        },
        PendingOperation::Delete { event_id, .. } => match resolve_target(event_id, created) {
            Ok(target) => delete(store, fanout, user_id, operation, target).await,
            Err(error) => Err(error),
        },
    };

    outcome.unwrap_or_else(|error| {
        tracing::debug!(operation_id = %operation.id, %error, "Batch operation failed");
        OperationResult::failed(&operation.id, error.to_string())
    })
}

fn resolve_target(
    event_id: EventId,
    created: &HashMap<EventId, EventId>,
) -> Result<EventId, Error> {
    if !event_id.is_temporary() {
        return Ok(event_id);
    }
    created.get(&event_id).copied().ok_or_else(|| {
        Error::InvalidInput(format!(
            "temporary id {event_id} was not created in this batch"
        ))
    })
}

async fn create(
    store: &dyn EventStore,
    fanout: &NotificationFanout,
    user_id: UserId,
    operation: &SyncOperation,
    temp_id: EventId,
    draft: EventDraft,
    created: &mut HashMap<EventId, EventId>,
) -> Result<OperationResult, Error> {
    let event = store.create(NewEvent::owned(user_id, draft)).await?;
    created.insert(temp_id, event.id);
    fanout.created(&event);
    Ok(OperationResult {
        server_id: Some(event.id),
        ..OperationResult::succeeded(&operation.id)
    })
}

async fn update(
    store: &dyn EventStore,
    fanout: &NotificationFanout,
    user_id: UserId,
    operation: &SyncOperation,
    target: EventId,
    draft: EventDraft,
) -> Result<OperationResult, Error> {
    let current = store
        .get_by_id(target, user_id)
        .await?
        .ok_or_else(|| Error::NotFound(target.to_string()))?;

    let conflict = ConflictPolicy::check_update(target, &draft, operation.timestamp, &current);
    if let Some(conflict) = &conflict {
        tracing::info!(
            operation_id = %operation.id,
            event_id = %target,
            local_timestamp = conflict.local_timestamp,
            server_timestamp = conflict.server_timestamp,
            "Stale update applied (last write wins)"
        );
    }

    let mut next = current;
    next.apply_draft(draft);
    let updated = store.update(&next).await?;
    fanout.updated(&updated);

    Ok(OperationResult {
        conflict,
        ..OperationResult::succeeded(&operation.id)
    })
}

async fn delete(
    store: &dyn EventStore,
    fanout: &NotificationFanout,
    user_id: UserId,
    operation: &SyncOperation,
    target: EventId,
) -> Result<OperationResult, Error> {
    let Some(current) = store.get_by_id(target, user_id).await? else {
        // Already gone: deletes are idempotent.
        return Ok(OperationResult::succeeded(&operation.id));
    };
    match store.delete(target, user_id).await {
        Ok(()) => fanout.deleted(&current),
        Err(Error::NotFound(_)) => {}
        Err(error) => return Err(error),
    }
    Ok(OperationResult::succeeded(&operation.id))
}
