//! Client-side persistence: pending-operation queue, offline cache and
//! conflict log.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::connection::{Database, Schema};
use crate::error::{Error, Result};
use crate::models::{
    ConflictInfo, ConflictRecord, DeadLetter, Event, EventId, OperationKind, QueuedOperation,
    SyncOperation,
};
use crate::util::now_millis;

const TEMP_ID_SEQUENCE: &str = "temp_event_id";
const LAST_WRITE_WINS: &str = "last_write_wins";

/// Durable FIFO of mutations awaiting replay.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    /// Append an operation. Enqueue timestamps never go backwards, so new
    /// operations always sort after existing ones.
    async fn enqueue(&self, operation: &SyncOperation) -> Result<()>;

    /// Every queued operation, oldest first
    async fn pending(&self) -> Result<Vec<QueuedOperation>>;

    async fn pending_count(&self) -> Result<usize>;

    /// Whether any queued operation targets `target_id`
    async fn has_pending_for(&self, target_id: EventId) -> Result<bool>;

    /// Remove an operation. Removing an unknown id is a no-op.
    async fn remove(&self, operation_id: &str) -> Result<()>;

    /// Count a failed replay attempt and return the new total
    async fn record_failure(&self, operation_id: &str) -> Result<u32>;

    /// Move an operation out of the queue into the dead-letter table
    async fn dead_letter(&self, operation_id: &str, reason: &str) -> Result<()>;

    /// Dead-lettered operations, most recent first
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Allocate a fresh temporary (negative) event id
    async fn next_temp_id(&self) -> Result<EventId>;

    /// Atomically finish a create: drop the operation, point every queued
    /// operation on `temp_id` at the server id and swap the cached row.
    ///
    /// Returns `false` when the create was no longer queued, in which case
    /// nothing is touched.
    async fn confirm_create(&self, operation_id: &str, temp_id: EventId, event: &Event)
        -> Result<bool>;

    /// Drop every queued operation and the cached row for an event that never
    /// reached the server. Returns the number of operations removed.
    async fn cancel_unsynced(&self, temp_id: EventId) -> Result<usize>;
}

/// Last known server view, used while offline.
#[async_trait]
pub trait OfflineCache: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<Event>>;

    /// Replace the server rows of the cache. Unconfirmed local creates are kept.
    async fn replace_snapshot(&self, events: &[Event]) -> Result<()>;

    /// Replace the snapshot only while no operation is queued, checked in the
    /// same transaction. Returns whether the snapshot was written.
    async fn replace_snapshot_if_idle(&self, events: &[Event]) -> Result<bool>;

    async fn cached(&self, id: EventId) -> Result<Option<Event>>;

    async fn upsert_cached(&self, event: &Event) -> Result<()>;

    async fn remove_cached(&self, id: EventId) -> Result<()>;
}

/// Persisted record of stale writes detected during sync.
#[async_trait]
pub trait ConflictLog: Send + Sync {
    async fn record_conflict(&self, conflict: &ConflictInfo) -> Result<ConflictRecord>;

    /// Most recent conflicts first
    async fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>>;
}

/// Everything the offline client persists.
pub trait LocalStore: SyncQueue + OfflineCache + ConflictLog {}

impl<T> LocalStore for T where T: SyncQueue + OfflineCache + ConflictLog {}

/// `SQLite` implementation of [`LocalStore`]
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteLocalStore {
    pub fn new(db: Database) -> Result<Self> {
        if db.schema() != Schema::Client {
            return Err(Error::Database(
                "local store requires a client database".to_string(),
            ));
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Database::open(path, Schema::Client)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory(Schema::Client)?)
    }

    /// Make every queue write fail, as a full or read-only disk would.
    #[cfg(test)]
    pub(crate) async fn break_queue(&self) {
        let db = self.db.lock().await;
        db.connection()
            .execute_batch("DROP TABLE pending_operations")
            .unwrap();
    }
}

#[async_trait]
impl SyncQueue for SqliteLocalStore {
    async fn enqueue(&self, operation: &SyncOperation) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT INTO pending_operations (id, kind, target_id, payload, enqueued_at, attempts)
             VALUES (?1, ?2, ?3, ?4,
                MAX(?5, (SELECT COALESCE(MAX(enqueued_at), 0) FROM pending_operations)), 0)",
            params![
                operation.id,
                operation.kind.as_str(),
                operation.target_id.get(),
                operation.payload,
                operation.timestamp,
            ],
        )?;
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<QueuedOperation>> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT id, kind, target_id, payload, enqueued_at, attempts
                 FROM pending_operations ORDER BY enqueued_at, seq",
            )?;
            let rows = stmt
                .query_map([], read_raw_operation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut operations = Vec::with_capacity(rows.len());
        for raw in rows {
            match OperationKind::parse(&raw.kind) {
                Ok(kind) => operations.push(raw.into_queued(kind)),
                Err(error) => {
                    tracing::warn!(
                        operation_id = %raw.id,
                        kind = %raw.kind,
                        "Dead-lettering queued operation with unknown kind"
                    );
                    move_to_dead_letters(&tx, &raw.id, &error.to_string())?;
                }
            }
        }
        tx.commit()?;
        Ok(operations)
    }

    async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        count_pending(db.connection())
    }

    async fn has_pending_for(&self, target_id: EventId) -> Result<bool> {
        let db = self.db.lock().await;
        let exists = db.connection().query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_operations WHERE target_id = ?)",
            params![target_id.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn remove(&self, operation_id: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "DELETE FROM pending_operations WHERE id = ?",
            params![operation_id],
        )?;
        Ok(())
    }

    async fn record_failure(&self, operation_id: &str) -> Result<u32> {
        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute(
            "UPDATE pending_operations SET attempts = attempts + 1 WHERE id = ?",
            params![operation_id],
        )?;
        let attempts: Option<u32> = conn
            .query_row(
                "SELECT attempts FROM pending_operations WHERE id = ?",
                params![operation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts.unwrap_or(0))
    }

    async fn dead_letter(&self, operation_id: &str, reason: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        move_to_dead_letters(&tx, operation_id, reason)?;
        tx.commit()?;
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(
            "SELECT id, kind, target_id, payload, enqueued_at, attempts, reason, failed_at
             FROM dead_letters ORDER BY failed_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let raw = read_raw_operation(row)?;
                let reason: String = row.get(6)?;
                let failed_at: i64 = row.get(7)?;
                Ok((raw, reason, failed_at))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(raw, reason, failed_at)| match OperationKind::parse(&raw.kind) {
                Ok(kind) => {
                    let queued = raw.into_queued(kind);
                    Some(DeadLetter {
                        operation: queued.operation,
                        attempts: queued.attempts,
                        reason,
                        failed_at,
                    })
                }
                Err(_) => {
                    tracing::warn!(operation_id = %raw.id, kind = %raw.kind, "Skipping dead letter with unknown kind");
                    None
                }
            })
            .collect())
    }

    async fn next_temp_id(&self) -> Result<EventId> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO local_sequence (name, value) VALUES (?, 0)",
            params![TEMP_ID_SEQUENCE],
        )?;
        tx.execute(
            "UPDATE local_sequence SET value = value - 1 WHERE name = ?",
            params![TEMP_ID_SEQUENCE],
        )?;
        let value: i64 = tx.query_row(
            "SELECT value FROM local_sequence WHERE name = ?",
            params![TEMP_ID_SEQUENCE],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(EventId::new(value))
    }

    async fn confirm_create(
        &self,
        operation_id: &str,
        temp_id: EventId,
        event: &Event,
    ) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let removed = tx.execute(
            "DELETE FROM pending_operations WHERE id = ?",
            params![operation_id],
        )?;
        if removed == 0 {
            return Ok(false);
        }

        // Edits queued before the create cannot be older than the server copy.
        tx.execute(
            "UPDATE pending_operations
             SET target_id = ?, enqueued_at = MAX(enqueued_at, ?)
             WHERE target_id = ?",
            params![event.id.get(), event.last_modified(), temp_id.get()],
        )?;
        tx.execute(
            "DELETE FROM cached_events WHERE id = ?",
            params![temp_id.get()],
        )?;
        write_cached(&tx, event)?;
        tx.commit()?;
        Ok(true)
    }

    async fn cancel_unsynced(&self, temp_id: EventId) -> Result<usize> {
        if !temp_id.is_temporary() {
            return Err(Error::InvalidInput(format!(
                "event {temp_id} is not a local-only event"
            )));
        }
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let removed = tx.execute(
            "DELETE FROM pending_operations WHERE target_id = ?",
            params![temp_id.get()],
        )?;
        tx.execute(
            "DELETE FROM cached_events WHERE id = ?",
            params![temp_id.get()],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

#[async_trait]
impl OfflineCache for SqliteLocalStore {
    async fn snapshot(&self) -> Result<Vec<Event>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .connection()
            .prepare("SELECT body FROM cached_events ORDER BY start_at, id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(Error::from))
            .collect()
    }

    async fn replace_snapshot(&self, events: &[Event]) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        write_snapshot(&tx, events)?;
        tx.commit()?;
        Ok(())
    }

    async fn replace_snapshot_if_idle(&self, events: &[Event]) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        if count_pending(&tx)? > 0 {
            return Ok(false);
        }
        write_snapshot(&tx, events)?;
        tx.commit()?;
        Ok(true)
    }

    async fn cached(&self, id: EventId) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let body: Option<String> = db
            .connection()
            .query_row(
                "SELECT body FROM cached_events WHERE id = ?",
                params![id.get()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|body| serde_json::from_str(&body).map_err(Error::from))
            .transpose()
    }

    async fn upsert_cached(&self, event: &Event) -> Result<()> {
        let db = self.db.lock().await;
        write_cached(db.connection(), event)
    }

    async fn remove_cached(&self, id: EventId) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM cached_events WHERE id = ?", params![id.get()])?;
        Ok(())
    }
}

#[async_trait]
impl ConflictLog for SqliteLocalStore {
    async fn record_conflict(&self, conflict: &ConflictInfo) -> Result<ConflictRecord> {
        let local_payload = serde_json::to_string(&conflict.local)?;
        let server_payload = serde_json::to_string(&conflict.server)?;
        let recorded_at = now_millis();

        let db = self.db.lock().await;
        let conn = db.connection();
        conn.execute(
            "INSERT INTO sync_conflicts (event_id, local_timestamp, server_timestamp,
                local_payload, server_payload, recorded_at, strategy)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.event_id.get(),
                conflict.local_timestamp,
                conflict.server_timestamp,
                local_payload,
                server_payload,
                recorded_at,
                LAST_WRITE_WINS,
            ],
        )?;

        Ok(ConflictRecord {
            id: conn.last_insert_rowid(),
            event_id: conflict.event_id,
            local_timestamp: conflict.local_timestamp,
            server_timestamp: conflict.server_timestamp,
            local_payload,
            server_payload,
            recorded_at,
            strategy: LAST_WRITE_WINS.to_string(),
        })
    }

    async fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.connection().prepare(
            "SELECT id, event_id, local_timestamp, server_timestamp, local_payload,
                server_payload, recorded_at, strategy
             FROM sync_conflicts
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?",
        )?;
        let records = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok(ConflictRecord {
                    id: row.get(0)?,
                    event_id: EventId::new(row.get(1)?),
                    local_timestamp: row.get(2)?,
                    server_timestamp: row.get(3)?,
                    local_payload: row.get(4)?,
                    server_payload: row.get(5)?,
                    recorded_at: row.get(6)?,
                    strategy: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// A queue row before its kind is checked.
struct RawOperation {
    id: String,
    kind: String,
    target_id: i64,
    payload: String,
    enqueued_at: i64,
    attempts: u32,
}

impl RawOperation {
    fn into_queued(self, kind: OperationKind) -> QueuedOperation {
        QueuedOperation {
            operation: SyncOperation {
                id: self.id,
                kind,
                target_id: EventId::new(self.target_id),
                payload: self.payload,
                timestamp: self.enqueued_at,
            },
            attempts: self.attempts,
        }
    }
}

fn read_raw_operation(row: &Row<'_>) -> rusqlite::Result<RawOperation> {
    Ok(RawOperation {
        id: row.get(0)?,
        kind: row.get(1)?,
        target_id: row.get(2)?,
        payload: row.get(3)?,
        enqueued_at: row.get(4)?,
        attempts: row.get(5)?,
    })
}

fn count_pending(conn: &Connection) -> Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn move_to_dead_letters(conn: &Connection, operation_id: &str, reason: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dead_letters
            (id, kind, target_id, payload, enqueued_at, attempts, reason, failed_at)
         SELECT id, kind, target_id, payload, enqueued_at, attempts, ?, ?
         FROM pending_operations WHERE id = ?",
        params![reason, now_millis(), operation_id],
    )?;
    conn.execute(
        "DELETE FROM pending_operations WHERE id = ?",
        params![operation_id],
    )?;
    Ok(())
}

fn write_cached(conn: &Connection, event: &Event) -> Result<()> {
    let body = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO cached_events (id, start_at, body) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET start_at = excluded.start_at, body = excluded.body",
        params![event.id.get(), event.start_at.timestamp_millis(), body],
    )?;
    Ok(())
}

fn write_snapshot(conn: &Connection, events: &[Event]) -> Result<()> {
    conn.execute("DELETE FROM cached_events WHERE id > 0", [])?;
    for event in events {
        write_cached(conn, event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::models::EventDraft;

    fn draft(title: &str) -> EventDraft {
        EventDraft::new(
            title,
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 19, 10, 0, 0).unwrap(),
        )
    }

    fn event(id: i64, title: &str) -> Event {
        Event::from_draft(EventId::new(id), 1, draft(title), 1_000)
    }

    fn ids(operations: &[QueuedOperation]) -> Vec<String> {
        operations.iter().map(|queued| queued.operation.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_pending_is_ordered_by_enqueue_time() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let first = SyncOperation::update(EventId::new(5), &draft("A"), 2_000).unwrap();
        let second = SyncOperation::delete(EventId::new(6), None, 3_000).unwrap();
        // Clock went backwards: still sorts after the others.
        let third = SyncOperation::update(EventId::new(7), &draft("C"), 1_000).unwrap();
        for operation in [&first, &second, &third] {
            store.enqueue(operation).await.unwrap();
        }

        let pending = store.pending().await.unwrap();
        assert_eq!(
            ids(&pending),
            vec![first.id.clone(), second.id.clone(), third.id.clone()]
        );
        assert_eq!(pending[2].operation.timestamp, 3_000);
        assert_eq!(store.pending_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let operation = SyncOperation::delete(EventId::new(5), None, 1_000).unwrap();
        store.enqueue(&operation).await.unwrap();

        store.remove(&operation.id).await.unwrap();
        store.remove(&operation.id).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_and_dead_letters() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let operation = SyncOperation::update(EventId::new(5), &draft("A"), 1_000).unwrap();
        store.enqueue(&operation).await.unwrap();

        assert_eq!(store.record_failure(&operation.id).await.unwrap(), 1);
        assert_eq!(store.record_failure(&operation.id).await.unwrap(), 2);
        assert_eq!(store.record_failure("missing").await.unwrap(), 0);

        store.dead_letter(&operation.id, "event was deleted").await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let dead = store.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].operation.id, operation.id);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].reason, "event was deleted");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_dead_lettered_on_read() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        {
            let db = store.db.lock().await;
            db.connection()
                .execute(
                    "INSERT INTO pending_operations (id, kind, target_id, payload, enqueued_at)
                     VALUES ('op-x', 'archive', 5, '{}', 1)",
                    [],
                )
                .unwrap();
        }

        assert!(store.pending().await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_temp_ids_are_negative_and_unique() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let first = store.next_temp_id().await.unwrap();
        let second = store.next_temp_id().await.unwrap();
        assert!(first.is_temporary());
        assert!(second.is_temporary());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_confirm_create_retargets_queued_operations() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let temp_id = store.next_temp_id().await.unwrap();
        let create = SyncOperation::create(temp_id, &draft("New"), 1_000).unwrap();
        let update = SyncOperation::update(temp_id, &draft("Renamed"), 2_000).unwrap();
        store.enqueue(&create).await.unwrap();
        store.enqueue(&update).await.unwrap();
        store.upsert_cached(&event(temp_id.get(), "New")).await.unwrap();

        let confirmed = event(42, "New");
        assert!(store.confirm_create(&create.id, temp_id, &confirmed).await.unwrap());

        let pending = store.pending().await.unwrap();
        assert_eq!(ids(&pending), vec![update.id.clone()]);
        assert_eq!(pending[0].operation.target_id, EventId::new(42));
        assert!(store.has_pending_for(EventId::new(42)).await.unwrap());
        assert!(!store.has_pending_for(temp_id).await.unwrap());
        assert!(store.cached(temp_id).await.unwrap().is_none());
        assert_eq!(store.cached(EventId::new(42)).await.unwrap(), Some(confirmed.clone()));

        // Second confirmation finds nothing to do.
        assert!(!store.confirm_create(&create.id, temp_id, &confirmed).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_unsynced_drops_queued_operations() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let temp_id = store.next_temp_id().await.unwrap();
        store
            .enqueue(&SyncOperation::create(temp_id, &draft("New"), 1_000).unwrap())
            .await
            .unwrap();
        store
            .enqueue(&SyncOperation::update(temp_id, &draft("Renamed"), 2_000).unwrap())
            .await
            .unwrap();
        store.upsert_cached(&event(temp_id.get(), "New")).await.unwrap();

        assert_eq!(store.cancel_unsynced(temp_id).await.unwrap(), 2);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(store.snapshot().await.unwrap().is_empty());
        assert!(store.cancel_unsynced(EventId::new(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_snapshot_keeps_local_creates() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        store.upsert_cached(&event(-1, "Local")).await.unwrap();
        store.upsert_cached(&event(3, "Stale")).await.unwrap();

        store
            .replace_snapshot(&[event(4, "Fresh")])
            .await
            .unwrap();

        let titles: Vec<String> = store
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .map(|event| event.title)
            .collect();
        assert_eq!(titles, vec!["Local".to_string(), "Fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_replace_snapshot_if_idle_skips_while_queue_non_empty() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        let operation = SyncOperation::delete(EventId::new(3), None, 1_000).unwrap();
        store.enqueue(&operation).await.unwrap();

        assert!(!store.replace_snapshot_if_idle(&[event(3, "Kept")]).await.unwrap());
        assert!(store.snapshot().await.unwrap().is_empty());

        store.remove(&operation.id).await.unwrap();
        assert!(store.replace_snapshot_if_idle(&[event(3, "Kept")]).await.unwrap());
        assert_eq!(store.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_conflicts_newest_first() {
        let store = SqliteLocalStore::open_in_memory().unwrap();
        for (event_id, local_timestamp) in [(1, 100), (2, 200)] {
            store
                .record_conflict(&ConflictInfo {
                    event_id: EventId::new(event_id),
                    local: draft("Mine"),
                    server: event(event_id, "Theirs"),
                    local_timestamp,
                    server_timestamp: 500,
                })
                .await
                .unwrap();
        }

        let conflicts = store.conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].event_id, EventId::new(2));
        assert_eq!(conflicts[0].strategy, "last_write_wins");
        assert_eq!(store.conflicts(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("client.db");
        let operation = SyncOperation::update(EventId::new(9), &draft("Durable"), 1_000).unwrap();

        {
            let store = SqliteLocalStore::open(&path).unwrap();
            store.enqueue(&operation).await.unwrap();
            store.upsert_cached(&event(9, "Durable")).await.unwrap();
        }

        let reopened = SqliteLocalStore::open(&path).unwrap();
        let pending = reopened.pending().await.unwrap();
        assert_eq!(ids(&pending), vec![operation.id.clone()]);
        assert!(reopened.cached(EventId::new(9)).await.unwrap().is_some());
    }
}
