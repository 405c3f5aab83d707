//! In-process remote backed by a real event store, with failure injection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::remote::{HealthProbe, RemoteEventApi, RemoteResult};
use crate::db::{EventStore, NewEvent, SqliteEventStore};
use crate::error::{Error, RemoteError};
use crate::models::{Event, EventDraft, EventId, UserId};

pub(crate) const OWNER: UserId = 1;

pub(crate) struct FakeRemote {
    pub(crate) server: SqliteEventStore,
    offline: AtomicBool,
    failing_titles: StdMutex<HashSet<String>>,
    block_next: AtomicBool,
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
    pub(crate) creates: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self {
            server: SqliteEventStore::open_in_memory().unwrap(),
            offline: AtomicBool::new(false),
            failing_titles: StdMutex::new(HashSet::new()),
            block_next: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            creates: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Creates and updates carrying this title fail with a transient error.
    pub(crate) fn fail_title(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    pub(crate) fn heal_title(&self, title: &str) {
        self.failing_titles.lock().unwrap().remove(title);
    }

    /// The next call parks until `release` is notified.
    pub(crate) fn block_next_call(&self) {
        self.block_next.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn server_events(&self) -> Vec<Event> {
        self.server.get_all(OWNER).await.unwrap()
    }

    async fn gate(&self) -> RemoteResult<()> {
        if self.block_next.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_title(&self, draft: &EventDraft) -> RemoteResult<()> {
        if self.failing_titles.lock().unwrap().contains(&draft.title) {
            return Err(RemoteError::Timeout);
        }
        Ok(())
    }
}

fn remote_error(error: Error) -> RemoteError {
    match error {
        Error::NotFound(_) => RemoteError::NotFound,
        Error::InvalidInput(message) => RemoteError::Rejected(message),
        other => RemoteError::Server(other.to_string()),
    }
}

#[async_trait]
impl RemoteEventApi for FakeRemote {
    async fn list_events(&self) -> RemoteResult<Vec<Event>> {
        self.gate().await?;
        self.server.get_all(OWNER).await.map_err(remote_error)
    }

    async fn get_event(&self, id: EventId) -> RemoteResult<Option<Event>> {
        self.gate().await?;
        self.server.get_by_id(id, OWNER).await.map_err(remote_error)
    }

    async fn create_event(&self, draft: &EventDraft) -> RemoteResult<Event> {
        self.gate().await?;
        self.check_title(draft)?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.server
            .create(NewEvent::owned(OWNER, draft.clone()))
            .await
            .map_err(remote_error)
    }

    async fn update_event(&self, id: EventId, draft: &EventDraft) -> RemoteResult<Event> {
        self.gate().await?;
        self.check_title(draft)?;
        let mut event = self
            .server
            .get_by_id(id, OWNER)
            .await
            .map_err(remote_error)?
            .ok_or(RemoteError::NotFound)?;
        event.apply_draft(draft.clone());
        self.server.update(&event).await.map_err(remote_error)
    }

    async fn delete_event(&self, id: EventId) -> RemoteResult<()> {
        self.gate().await?;
        self.server.delete(id, OWNER).await.map_err(remote_error)
    }

    async fn public_events(&self) -> RemoteResult<Vec<Event>> {
        self.gate().await?;
        self.server.get_public().await.map_err(remote_error)
    }

    async fn join_event(&self, id: EventId) -> RemoteResult<Event> {
        self.gate().await?;
        let original = self
            .server
            .get_public_by_id(id)
            .await
            .map_err(remote_error)?
            .ok_or(RemoteError::NotFound)?;
        self.server
            .create(NewEvent {
                owner_id: OWNER,
                draft: original.to_draft(),
                original_event_id: Some(original.id),
            })
            .await
            .map_err(remote_error)
    }
}

#[async_trait]
impl HealthProbe for FakeRemote {
    async fn probe(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unreachable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}
