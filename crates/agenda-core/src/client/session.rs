//! Offline-first event operations for one signed-in client

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::db::{LocalStore, SqliteLocalStore};
use crate::error::{Error, RemoteError, Result};
use crate::models::{
    ConflictRecord, DeadLetter, Event, EventDraft, EventId, PushMessage, QueuedOperation,
    SyncOperation, UserId,
};
use crate::sync::{
    ClientNotice, ClientReconciler, ConnectivityMonitor, ConnectivityState, HealthProbe,
    HttpEventApi, LinkState, MonitorHandle, PushOutcome, RemoteEventApi, SyncEngine, SyncReport,
    NOTICE_CHANNEL_CAPACITY,
};
use crate::util::now_millis;

/// Owner recorded on events that exist only locally.
const LOCAL_OWNER: UserId = 0;

enum CacheChange<'a> {
    Upsert(&'a Event),
    Remove(EventId),
}

/// Client entry point: reads come from the local view, mutations are applied
/// optimistically and then sent or queued.
pub struct Session {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteEventApi>,
    monitor: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
    view: Arc<Mutex<ClientReconciler>>,
    notices: broadcast::Sender<ClientNotice>,
}

/// Background probing and reconnect sync; stopped on drop.
pub struct SessionTasks {
    cancel: CancellationToken,
    _monitor: MonitorHandle,
    auto_sync: Option<JoinHandle<()>>,
}

impl SessionTasks {
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.auto_sync.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Auto-sync task failed");
            }
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn storage_unavailable(error: Error) -> Error {
    match error {
        Error::StorageUnavailable(_) => error,
        other => Error::StorageUnavailable(other.to_string()),
    }
}

impl Session {
    pub async fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteEventApi>,
        monitor: Arc<ConnectivityMonitor>,
        max_attempts: u32,
    ) -> Result<Self> {
        let cached = store.snapshot().await?;
        let view = Arc::new(Mutex::new(ClientReconciler::seed(cached)));
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&monitor),
            Arc::clone(&view),
            notices.clone(),
            max_attempts,
        ));

        Ok(Self {
            store,
            remote,
            monitor,
            engine,
            view,
            notices,
        })
    }

    /// Open the local database at `db_path` and talk to the configured API.
    pub async fn open(config: &ClientConfig, db_path: impl AsRef<Path>) -> Result<Self> {
        let store = Arc::new(SqliteLocalStore::open(db_path)?);
        let api = Arc::new(HttpEventApi::from_config(config)?);
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&api) as Arc<dyn HealthProbe>,
            config.probe_interval,
            config.probe_timeout,
        ));
        Self::new(store, api, monitor, config.max_sync_attempts).await
    }

    pub const fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }

    /// Start periodic probing and sync-on-reconnect.
    pub fn start(&self) -> SessionTasks {
        let cancel = CancellationToken::new();
        let monitor = self.monitor.start();
        let auto_sync = self.engine.spawn_auto_sync(cancel.child_token());
        SessionTasks {
            cancel,
            _monitor: monitor,
            auto_sync: Some(auto_sync),
        }
    }

    pub async fn check_connectivity(&self) -> ConnectivityState {
        self.monitor.check_now().await
    }

    pub async fn synchronize(&self) -> SyncReport {
        self.engine.synchronize().await
    }

    /// Every visible event, ordered by start time
    pub async fn events(&self) -> Vec<Event> {
        self.view.lock().await.events()
    }

    /// Visible events overlapping `[start, end]`
    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        if end < start {
            return Err(Error::InvalidInput(
                "range end must not be before range start".to_string(),
            ));
        }
        Ok(self
            .events()
            .await
            .into_iter()
            .filter(|event| event.overlaps(start, end))
            .collect())
    }

    /// Look up one event; a temporary id is followed to its server id.
    pub async fn event(&self, id: EventId) -> Option<Event> {
        let view = self.view.lock().await;
        view.get(view.resolve(id)).cloned()
    }

    pub async fn create(&self, draft: EventDraft) -> Result<Event> {
        draft.validate()?;

        let temp_id = self
            .store
            .next_temp_id()
            .await
            .map_err(storage_unavailable)?;
        let local = Event::from_draft(temp_id, LOCAL_OWNER, draft.clone(), now_millis());
        self.view.lock().await.begin_local_create(local.clone());

        if self.monitor.is_online() {
            match self.remote.create_event(&draft).await {
                Ok(event) => {
                    let mut view = self.view.lock().await;
                    view.complete_create(temp_id, event.clone());
                    self.write_cache(CacheChange::Upsert(&event)).await;
                    return Ok(event);
                }
                Err(error) if error.is_transient() => self.note_transient(&error),
                Err(error) => {
                    self.view.lock().await.revert(temp_id, None);
                    return Err(error.into());
                }
            }
        }

        let operation = SyncOperation::create(temp_id, &draft, now_millis())?;
        self.queue(&operation, CacheChange::Upsert(&local), temp_id, None)
            .await?;
        Ok(local)
    }

    pub async fn update(&self, id: EventId, draft: EventDraft) -> Result<Event> {
        draft.validate()?;

        let mut view = self.view.lock().await;
        let id = view.resolve(id);
        let current = match view.get(id) {
            Some(event) => event.clone(),
            None => self
                .store
                .cached(id)
                .await?
                .ok_or_else(|| Error::NotFound(id.to_string()))?,
        };
        let mut updated = current.clone();
        updated.apply_draft(draft.clone());
        let previous = view.begin_local_update(updated.clone()).or(Some(current));

        if id.is_temporary() {
            // Enqueue under the same guard: a sync pass confirming the create
            // in between would leave this edit targeting a retired id.
            let operation = SyncOperation::update(id, &draft, now_millis())?;
            let cache = CacheChange::Upsert(&updated);
            self.enqueue_locked(&mut view, &operation, cache, id, previous)
                .await?;
            drop(view);
            self.queued(&operation, id).await;
            return Ok(updated);
        }
        drop(view);

        if self.can_send_directly(id).await? {
            match self.remote.update_event(id, &draft).await {
                Ok(event) => {
                    let mut view = self.view.lock().await;
                    view.confirm_update(event.clone());
                    self.write_cache(CacheChange::Upsert(&event)).await;
                    return Ok(event);
                }
                Err(RemoteError::NotFound) => {
                    let mut view = self.view.lock().await;
                    view.forget(id);
                    self.write_cache(CacheChange::Remove(id)).await;
                    return Err(Error::NotFound(id.to_string()));
                }
                Err(error) if error.is_transient() => self.note_transient(&error),
                Err(error) => {
                    self.view.lock().await.revert(id, previous);
                    return Err(error.into());
                }
            }
        }

        let operation = SyncOperation::update(id, &draft, now_millis())?;
        self.queue(&operation, CacheChange::Upsert(&updated), id, previous)
            .await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: EventId) -> Result<()> {
        let mut view = self.view.lock().await;
        let id = view.resolve(id);

        if id.is_temporary() {
            // Never reached the server: drop the queued create instead.
            let cancelled = self
                .store
                .cancel_unsynced(id)
                .await
                .map_err(storage_unavailable)?;
            let removed = view.begin_local_delete(id);
            drop(view);
            if removed.is_none() && cancelled == 0 {
                return Err(Error::NotFound(id.to_string()));
            }
            tracing::debug!(event_id = %id, cancelled, "Cancelled unsynced event");
            self.publish_pending_count().await;
            return Ok(());
        }

        let previous = match view.get(id) {
            Some(event) => Some(event.clone()),
            None => self.store.cached(id).await?,
        };
        let Some(title) = previous.as_ref().map(|event| event.title.clone()) else {
            return Err(Error::NotFound(id.to_string()));
        };
        view.begin_local_delete(id);
        drop(view);

        if self.can_send_directly(id).await? {
            match self.remote.delete_event(id).await {
                Ok(()) => {
                    self.write_cache(CacheChange::Remove(id)).await;
                    return Ok(());
                }
                Err(RemoteError::NotFound) => {
                    let mut view = self.view.lock().await;
                    view.forget(id);
                    self.write_cache(CacheChange::Remove(id)).await;
                    return Ok(());
                }
                Err(error) if error.is_transient() => self.note_transient(&error),
                Err(error) => {
                    self.view.lock().await.revert(id, previous);
                    return Err(error.into());
                }
            }
        }

        let operation = SyncOperation::delete(id, Some(title), now_millis())?;
        self.queue(&operation, CacheChange::Remove(id), id, previous)
            .await
    }

    /// Pull the server's events into the cache when nothing is queued.
    pub async fn refresh(&self) -> Result<bool> {
        if !self.monitor.is_online() || self.store.pending_count().await? > 0 {
            return Ok(false);
        }

        let events = match self.remote.list_events().await {
            Ok(events) => events,
            Err(error) if error.is_transient() => {
                self.note_transient(&error);
                return Ok(false);
            }
            Err(error) => return Err(error.into()),
        };

        let mut view = self.view.lock().await;
        let replaced = self.store.replace_snapshot_if_idle(&events).await?;
        if replaced {
            view.replace_view(events);
        }
        Ok(replaced)
    }

    /// The push transport is connected again: re-probe, then pull whatever
    /// changed while pushes could not arrive.
    pub async fn transport_restored(&self) -> Result<bool> {
        if !self.monitor.set_link_state(LinkState::Up).await.is_online() {
            return Ok(false);
        }
        self.refresh().await
    }

    /// The push transport lost its network path. Goes offline at once and
    /// skips probing until [`Session::transport_restored`].
    pub async fn transport_lost(&self) {
        self.monitor.set_link_state(LinkState::Down).await;
    }

    /// Merge a real-time push into the view and cache.
    pub async fn apply_push(&self, message: &PushMessage) -> Result<PushOutcome> {
        let mut view = self.view.lock().await;
        let outcome = view.apply_push(message);

        match (&outcome, message) {
            (PushOutcome::Replaced { temp_id, event }, _) => {
                self.store.remove_cached(*temp_id).await?;
                self.store.upsert_cached(event).await?;
            }
            (PushOutcome::Inserted(event) | PushOutcome::Applied(event), _) => {
                self.store.upsert_cached(event).await?;
            }
            (PushOutcome::Removed(deleted), _) => {
                self.store.remove_cached(deleted.id).await?;
            }
            (PushOutcome::Confirmed, PushMessage::Deleted(deleted)) => {
                self.store.remove_cached(deleted.id).await?;
            }
            (PushOutcome::Confirmed, PushMessage::Created(event) | PushMessage::Updated(event)) => {
                if !self.store.has_pending_for(event.id).await? {
                    self.store.upsert_cached(event).await?;
                }
            }
            (PushOutcome::Ignored, _) => {}
        }
        drop(view);

        tracing::debug!(event_id = %message.event_id(), ?outcome, "Applied push");
        match &outcome {
            PushOutcome::Inserted(event) => self.notify(ClientNotice::EventAdded(event.clone())),
            PushOutcome::Applied(event) => self.notify(ClientNotice::EventChanged(event.clone())),
            PushOutcome::Removed(deleted) => {
                self.notify(ClientNotice::EventRemoved(deleted.clone()));
            }
            PushOutcome::Replaced { .. } | PushOutcome::Confirmed | PushOutcome::Ignored => {}
        }
        Ok(outcome)
    }

    pub async fn pending(&self) -> Result<Vec<QueuedOperation>> {
        self.store.pending().await
    }

    pub async fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.store.conflicts(limit).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters().await
    }

    /// Public events on the server. Requires connectivity.
    pub async fn public_events(&self) -> Result<Vec<Event>> {
        self.remote.public_events().await.map_err(|error| {
            self.note_transient(&error);
            Error::from(error)
        })
    }

    /// Join a public event. Requires connectivity.
    pub async fn join(&self, id: EventId) -> Result<Event> {
        let event = self.remote.join_event(id).await.map_err(|error| {
            self.note_transient(&error);
            Error::from(error)
        })?;
        let mut view = self.view.lock().await;
        view.expect_created(event.clone());
        self.write_cache(CacheChange::Upsert(&event)).await;
        Ok(event)
    }

    async fn can_send_directly(&self, id: EventId) -> Result<bool> {
        if id.is_temporary() || !self.monitor.is_online() {
            return Ok(false);
        }
        // Earlier queued edits to this event must be replayed first.
        let queued = self
            .store
            .has_pending_for(id)
            .await
            .map_err(storage_unavailable)?;
        Ok(!queued)
    }

    async fn queue(
        &self,
        operation: &SyncOperation,
        cache: CacheChange<'_>,
        id: EventId,
        previous: Option<Event>,
    ) -> Result<()> {
        let mut view = self.view.lock().await;
        self.enqueue_locked(&mut view, operation, cache, id, previous)
            .await?;
        drop(view);
        self.queued(operation, id).await;
        Ok(())
    }

    /// Persist the operation and its cache row while the caller holds the view.
    async fn enqueue_locked(
        &self,
        view: &mut ClientReconciler,
        operation: &SyncOperation,
        cache: CacheChange<'_>,
        id: EventId,
        previous: Option<Event>,
    ) -> Result<()> {
        if let Err(error) = self.store.enqueue(operation).await {
            tracing::warn!(
                operation_id = %operation.id,
                event_id = %id,
                %error,
                "Failed to queue mutation; reverting"
            );
            view.revert(id, previous);
            return Err(storage_unavailable(error));
        }
        self.write_cache(cache).await;
        Ok(())
    }

    async fn queued(&self, operation: &SyncOperation, id: EventId) {
        tracing::debug!(
            operation_id = %operation.id,
            kind = operation.kind.as_str(),
            event_id = %id,
            "Queued mutation"
        );
        self.publish_pending_count().await;
    }

    async fn write_cache(&self, change: CacheChange<'_>) {
        let result = match change {
            CacheChange::Upsert(event) => self.store.upsert_cached(event).await,
            CacheChange::Remove(id) => self.store.remove_cached(id).await,
        };
        if let Err(error) = result {
            tracing::warn!(%error, "Failed to update offline cache");
        }
    }

    fn note_transient(&self, error: &RemoteError) {
        if matches!(error, RemoteError::Unreachable(_) | RemoteError::Timeout) {
            self.monitor.report_unreachable();
        }
        tracing::debug!(%error, "Remote call failed");
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notices.send(notice);
    }

    async fn publish_pending_count(&self) {
        match self.store.pending_count().await {
            Ok(count) => self.notify(ClientNotice::PendingCount(count)),
            Err(error) => tracing::warn!(%error, "Failed to count pending operations"),
        }
    }
}
