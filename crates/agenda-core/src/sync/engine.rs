//! Replay of queued offline operations

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connectivity::{ConnectivityMonitor, ConnectivityState};
use super::notice::ClientNotice;
use super::policy::ConflictPolicy;
use super::reconciler::{ClientReconciler, PendingKind};
use super::remote::RemoteEventApi;
use crate::db::LocalStore;
use crate::error::{Error, RemoteError, Result};
use crate::models::{
    ConflictInfo, EventDraft, EventId, OperationKind, PendingOperation, QueuedOperation,
    SyncOperation,
};
use crate::util::now_millis;

/// Default ceiling on transient failures before an operation is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// How a synchronization pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// The API was unreachable; nothing was attempted
    SkippedOffline,
    /// Another pass was already running
    SkippedInFlight,
    /// The pass stopped early; the queue is left for the next attempt
    Failed(String),
}

/// Result of one [`SyncEngine::synchronize`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Subset of `failed` moved to the dead-letter table
    pub dead_lettered: usize,
    pub conflicts: Vec<ConflictInfo>,
    /// Temporary ids confirmed during the pass
    pub mappings: Vec<(EventId, EventId)>,
    pub snapshot_refreshed: bool,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    const fn new(outcome: SyncOutcome) -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
            conflicts: Vec::new(),
            mappings: Vec::new(),
            snapshot_refreshed: false,
            outcome,
        }
    }

    fn counts(&self) -> String {
        format!(
            "{} succeeded / {} failed / {} conflicts",
            self.succeeded,
            self.failed,
            self.conflicts.len()
        )
    }

    /// One-line status for the user
    pub fn summary(&self) -> String {
        match &self.outcome {
            SyncOutcome::Completed => self.counts(),
            SyncOutcome::SkippedOffline => "Offline: sync skipped".to_string(),
            SyncOutcome::SkippedInFlight => "Sync already in progress".to_string(),
            SyncOutcome::Failed(error) => format!("Sync failed: {error} ({})", self.counts()),
        }
    }
}

/// Bookkeeping for one pass.
#[derive(Default)]
struct PassState {
    /// Temporary id to server id for creates confirmed this pass
    mapping: HashMap<EventId, EventId>,
    /// Server modification time of events created this pass
    created: HashMap<EventId, i64>,
    /// Targets with a failed operation this pass; later operations on them wait
    blocked: HashSet<EventId>,
}

enum Replay {
    Succeeded,
    /// Connectivity-class failure; retry on a later pass
    Retry(RemoteError),
    /// Cannot succeed; dead-letter
    Permanent(String),
}

fn classify(error: RemoteError) -> Replay {
    if error.is_transient() {
        Replay::Retry(error)
    } else {
        Replay::Permanent(error.to_string())
    }
}

/// Drains the local queue against the API.
///
/// At most one pass runs at a time; overlapping calls return immediately with
/// [`SyncOutcome::SkippedInFlight`].
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteEventApi>,
    monitor: Arc<ConnectivityMonitor>,
    view: Arc<Mutex<ClientReconciler>>,
    notices: broadcast::Sender<ClientNotice>,
    gate: Semaphore,
    max_attempts: u32,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteEventApi>,
        monitor: Arc<ConnectivityMonitor>,
        view: Arc<Mutex<ClientReconciler>>,
        notices: broadcast::Sender<ClientNotice>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            remote,
            monitor,
            view,
            notices,
            gate: Semaphore::new(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run one synchronization pass.
    ///
    /// Never returns an error: pass-level failures are reported in the
    /// outcome and on the notice channel.
    pub async fn synchronize(&self) -> SyncReport {
        let Ok(_permit) = self.gate.try_acquire() else {
            tracing::debug!("Synchronization already in flight");
            return SyncReport::new(SyncOutcome::SkippedInFlight);
        };

        let mut report = SyncReport::new(SyncOutcome::Completed);
        if !self.monitor.is_online() {
            report.outcome = SyncOutcome::SkippedOffline;
        } else if let Err(error) = self.run_pass(&mut report).await {
            tracing::warn!(%error, "Synchronization pass failed");
            report.outcome = SyncOutcome::Failed(error.to_string());
        }

        self.publish(&report).await;
        report
    }

    /// Synchronize on every Online transition until cancelled.
    pub fn spawn_auto_sync(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut transitions = self.monitor.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = transitions.recv() => match received {
                        Ok(state) => {
                            engine.notify(ClientNotice::Connectivity(state));
                            if state == ConnectivityState::Online {
                                let report = engine.synchronize().await;
                                tracing::info!(summary = %report.summary(), "Reconnect sync finished");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed connectivity transitions");
                            if engine.monitor.is_online() {
                                engine.synchronize().await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn run_pass(&self, report: &mut SyncReport) -> Result<()> {
        let queued = self.store.pending().await?;
        tracing::debug!(count = queued.len(), "Replaying queued operations");

        let unconfirmed: HashSet<EventId> = queued
            .iter()
            .filter(|item| item.operation.kind == OperationKind::Create)
            .map(|item| item.operation.target_id)
            .collect();
        let mut pass = PassState::default();

        for item in &queued {
            let operation = &item.operation;
            let decoded = match operation.decode() {
                Ok(decoded) => decoded,
                Err(error) => {
                    tracing::warn!(
                        operation_id = %operation.id,
                        %error,
                        "Dead-lettering malformed queued operation"
                    );
                    self.dead_letter(operation, &error.to_string(), report).await?;
                    continue;
                }
            };

            let target = decoded.target();
            let resolved = if target.is_temporary() && decoded.kind() != OperationKind::Create {
                match pass.mapping.get(&target) {
                    Some(real) => *real,
                    None if unconfirmed.contains(&target) => {
                        tracing::debug!(operation_id = %operation.id, event_id = %target, "Deferring until create is confirmed");
                        report.failed += 1;
                        continue;
                    }
                    None => {
                        let reason = format!("no queued create for temporary event {target}");
                        tracing::warn!(operation_id = %operation.id, %reason, "Dead-lettering orphaned operation");
                        self.dead_letter(operation, &reason, report).await?;
                        continue;
                    }
                }
            } else {
                target
            };

            if pass.blocked.contains(&resolved) {
                tracing::debug!(operation_id = %operation.id, event_id = %resolved, "Deferring behind failed operation");
                report.failed += 1;
                continue;
            }

            match self.replay(operation, decoded, resolved, &mut pass, report).await? {
                Replay::Succeeded => {
                    tracing::debug!(operation_id = %operation.id, event_id = %resolved, "Replayed operation");
                    report.succeeded += 1;
                }
                Replay::Retry(error) => {
                    pass.blocked.insert(resolved);
                    report.failed += 1;
                    self.retry_later(item, &error, report).await?;
                }
                Replay::Permanent(reason) => {
                    tracing::warn!(
                        operation_id = %operation.id,
                        event_id = %resolved,
                        %reason,
                        "Dead-lettering operation that cannot succeed"
                    );
                    self.dead_letter(operation, &reason, report).await?;
                }
            }
        }

        if report.failed == 0 {
            let snapshot = self.remote.list_events().await.map_err(Error::from)?;
            let mut view = self.view.lock().await;
            if self.store.replace_snapshot_if_idle(&snapshot).await? {
                view.replace_view(snapshot);
                report.snapshot_refreshed = true;
            }
        }

        Ok(())
    }

    async fn replay(
        &self,
        operation: &SyncOperation,
        decoded: PendingOperation,
        target: EventId,
        pass: &mut PassState,
        report: &mut SyncReport,
    ) -> Result<Replay> {
        match decoded {
            PendingOperation::Create { temp_id, draft } => {
                self.replay_create(operation, temp_id, &draft, pass, report)
                    .await
            }
            PendingOperation::Update { draft, .. } => {
                // An event created this pass cannot have been changed by anyone else.
                let base = pass
                    .created
                    .get(&target)
                    .map_or(operation.timestamp, |created| {
                        operation.timestamp.max(*created)
                    });
                self.replay_update(operation, target, &draft, base, report)
                    .await
            }
            PendingOperation::Delete { .. } => self.replay_delete(operation, target).await,
        }
    }

    async fn replay_create(
        &self,
        operation: &SyncOperation,
        temp_id: EventId,
        draft: &EventDraft,
        pass: &mut PassState,
        report: &mut SyncReport,
    ) -> Result<Replay> {
        let event = match self.remote.create_event(draft).await {
            Ok(event) => event,
            Err(error) => {
                let replay = classify(error);
                if matches!(replay, Replay::Permanent(_)) {
                    self.discard_local(temp_id).await?;
                }
                return Ok(replay);
            }
        };

        let mut view = self.view.lock().await;
        if self
            .store
            .confirm_create(&operation.id, temp_id, &event)
            .await?
        {
            pass.mapping.insert(temp_id, event.id);
            pass.created.insert(event.id, event.last_modified());
            view.complete_create(temp_id, event.clone());
            report.mappings.push((temp_id, event.id));
            tracing::info!(temp_id = %temp_id, event_id = %event.id, "Confirmed offline create");
        } else {
            drop(view);
            // Deleted locally while the create was in flight.
            self.discard_remote(event.id, &event.title).await?;
        }
        Ok(Replay::Succeeded)
    }

    async fn replay_update(
        &self,
        operation: &SyncOperation,
        target: EventId,
        draft: &EventDraft,
        base_timestamp: i64,
        report: &mut SyncReport,
    ) -> Result<Replay> {
        self.view
            .lock()
            .await
            .expect_echo(target, PendingKind::Update);

        let server = match self.remote.get_event(target).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                self.discard_local(target).await?;
                return Ok(Replay::Permanent(format!("event {target} no longer exists")));
            }
            Err(error) => return Ok(self.classify_for(target, error).await),
        };
        let conflict = ConflictPolicy::check_update(target, draft, base_timestamp, &server);

        let updated = match self.remote.update_event(target, draft).await {
            Ok(updated) => updated,
            Err(RemoteError::NotFound) => {
                self.discard_local(target).await?;
                return Ok(Replay::Permanent(format!("event {target} no longer exists")));
            }
            Err(error) => return Ok(self.classify_for(target, error).await),
        };

        if let Some(conflict) = conflict {
            tracing::info!(
                event_id = %target,
                local_timestamp = conflict.local_timestamp,
                server_timestamp = conflict.server_timestamp,
                "Stale update applied (last write wins)"
            );
            self.store.record_conflict(&conflict).await?;
            report.conflicts.push(conflict);
        }

        let mut view = self.view.lock().await;
        self.store.remove(&operation.id).await?;
        // Later queued edits to the same event keep their optimistic state.
        if !self.store.has_pending_for(target).await? {
            self.store.upsert_cached(&updated).await?;
            view.confirm_update(updated);
        }
        Ok(Replay::Succeeded)
    }

    async fn replay_delete(&self, operation: &SyncOperation, target: EventId) -> Result<Replay> {
        self.view
            .lock()
            .await
            .expect_echo(target, PendingKind::Delete);

        let echo_expected = match self.remote.delete_event(target).await {
            Ok(()) => true,
            // Already gone counts as deleted.
            Err(RemoteError::NotFound) => false,
            Err(error) => return Ok(self.classify_for(target, error).await),
        };

        let mut view = self.view.lock().await;
        self.store.remove(&operation.id).await?;
        self.store.remove_cached(target).await?;
        if !echo_expected {
            view.forget(target);
        }
        Ok(Replay::Succeeded)
    }

    async fn classify_for(&self, target: EventId, error: RemoteError) -> Replay {
        let replay = classify(error);
        if matches!(replay, Replay::Permanent(_)) {
            self.view.lock().await.clear_pending(target);
        }
        replay
    }

    async fn retry_later(
        &self,
        item: &QueuedOperation,
        error: &RemoteError,
        report: &mut SyncReport,
    ) -> Result<()> {
        let operation = &item.operation;
        match error {
            RemoteError::Unreachable(_) | RemoteError::Timeout => {
                self.monitor.report_unreachable();
            }
            RemoteError::Unauthorized(_) => {
                tracing::warn!(
                    operation_id = %operation.id,
                    %error,
                    "Replay unauthorized; keeping operation queued"
                );
                return Ok(());
            }
            _ => {}
        }

        let attempts = self.store.record_failure(&operation.id).await?;
        tracing::debug!(operation_id = %operation.id, attempts, %error, "Replay failed; will retry");
        if attempts >= self.max_attempts {
            let reason = format!("gave up after {attempts} attempts: {error}");
            tracing::warn!(operation_id = %operation.id, %reason, "Dead-lettering operation");
            self.store.dead_letter(&operation.id, &reason).await?;
            report.dead_lettered += 1;
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        operation: &SyncOperation,
        reason: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        self.store.dead_letter(&operation.id, reason).await?;
        report.failed += 1;
        report.dead_lettered += 1;
        Ok(())
    }

    /// Drop the cached copy of an event the server will never hold.
    async fn discard_local(&self, id: EventId) -> Result<()> {
        let mut view = self.view.lock().await;
        self.store.remove_cached(id).await?;
        view.forget(id);
        Ok(())
    }

    async fn discard_remote(&self, id: EventId, title: &str) -> Result<()> {
        match self.remote.delete_event(id).await {
            Ok(()) | Err(RemoteError::NotFound) => Ok(()),
            Err(error) => {
                tracing::warn!(event_id = %id, %error, "Queueing delete for cancelled create");
                let operation = SyncOperation::delete(id, Some(title.to_string()), now_millis())?;
                self.store.enqueue(&operation).await
            }
        }
    }

    fn notify(&self, notice: ClientNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    async fn publish(&self, report: &SyncReport) {
        self.notify(ClientNotice::Status(report.summary()));
        if !report.conflicts.is_empty() {
            self.notify(ClientNotice::Conflicts(report.conflicts.clone()));
        }
        match self.store.pending_count().await {
            Ok(count) => self.notify(ClientNotice::PendingCount(count)),
            Err(error) => tracing::warn!(%error, "Failed to count pending operations"),
        }
    }
}
