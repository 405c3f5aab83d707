//! Server-side event store

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::connection::{Database, Schema};
use crate::error::{Error, Result};
use crate::models::{Event, EventDraft, EventId, Invitation, UserId, Visibility};
use crate::util::now_millis;

const EVENT_COLUMNS: &str = "id, owner_id, title, description, start_at, end_at, location, \
     all_day, color, status, event_type, visibility, category_id, original_event_id, \
     created_at, last_modified_at";

/// Input for [`EventStore::create`].
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub owner_id: UserId,
    pub draft: EventDraft,
    /// Set when the new event is a joined copy of a public event
    pub original_event_id: Option<EventId>,
}

impl NewEvent {
    pub const fn owned(owner_id: UserId, draft: EventDraft) -> Self {
        Self {
            owner_id,
            draft,
            original_event_id: None,
        }
    }
}

/// Authoritative event storage, scoped per owner.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Get an event by id if the caller owns it
    async fn get_by_id(&self, id: EventId, owner_id: UserId) -> Result<Option<Event>>;

    /// All events owned by the caller, ordered by start time
    async fn get_all(&self, owner_id: UserId) -> Result<Vec<Event>>;

    /// Owned events overlapping `[start, end]`
    async fn get_by_date_range(
        &self,
        owner_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// Insert a new event and return it with its assigned id
    async fn create(&self, event: NewEvent) -> Result<Event>;

    /// Persist the mutable fields of an owned event and bump its modification time
    async fn update(&self, event: &Event) -> Result<Event>;

    /// Hard delete an owned event
    async fn delete(&self, id: EventId, owner_id: UserId) -> Result<()>;

    /// Every public event, ordered by start time
    async fn get_public(&self) -> Result<Vec<Event>>;

    async fn get_public_by_id(&self, id: EventId) -> Result<Option<Event>>;

    /// The caller's copy of a public event, if they already joined it
    async fn find_joined_copy(
        &self,
        original_id: EventId,
        owner_id: UserId,
    ) -> Result<Option<Event>>;
}

/// `SQLite` implementation of [`EventStore`]
#[derive(Clone)]
pub struct SqliteEventStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteEventStore {
    pub fn new(db: Database) -> Result<Self> {
        if db.schema() != Schema::Server {
            return Err(Error::Database(
                "event store requires a server database".to_string(),
            ));
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Database::open_in_memory(Schema::Server)?)
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(Database::open(path, Schema::Server)?)
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn get_by_id(&self, id: EventId, owner_id: UserId) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ? AND owner_id = ?");
        let event = conn
            .query_row(&sql, params![id.get(), owner_id], row_to_event)
            .optional()?;
        with_invitations(conn, event)
    }

    async fn get_all(&self, owner_id: UserId) -> Result<Vec<Event>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE owner_id = ? ORDER BY start_at, id"
        );
        query_events(db.connection(), &sql, params![owner_id])
    }

    async fn get_by_date_range(
        &self,
        owner_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        if end < start {
            return Err(Error::InvalidInput(
                "range end must not be before range start".to_string(),
            ));
        }
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE owner_id = ? AND start_at <= ? AND end_at >= ?
             ORDER BY start_at, id"
        );
        query_events(
            db.connection(),
            &sql,
            params![owner_id, end.timestamp_millis(), start.timestamp_millis()],
        )
    }

    async fn create(&self, event: NewEvent) -> Result<Event> {
        let NewEvent {
            owner_id,
            draft,
            original_event_id,
        } = event;
        draft.validate()?;

        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let now = now_millis();
        tx.execute(
            "INSERT INTO events (owner_id, title, description, start_at, end_at, location,
                all_day, color, status, event_type, visibility, category_id,
                original_event_id, created_at, last_modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
            params![
                owner_id,
                draft.title.trim(),
                draft.description,
                draft.start_at.timestamp_millis(),
                draft.end_at.timestamp_millis(),
                draft.location,
                draft.all_day,
                draft.color,
                draft.status.as_str(),
                draft.event_type.as_str(),
                draft.visibility.as_str(),
                draft.category_id,
                original_event_id.map(EventId::get),
                now,
            ],
        )
        .map_err(|error| match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) if original_event_id.is_some() => {
                Error::InvalidInput("event already joined".to_string())
            }
            _ => Error::Sqlite(error),
        })?;
        let id = EventId::new(tx.last_insert_rowid());
        replace_invitations(&tx, id, &draft.invitations)?;
        tx.commit()?;

        let mut created = Event::from_draft(id, owner_id, draft, now);
        created.original_event_id = original_event_id;
        Ok(created)
    }

    async fn update(&self, event: &Event) -> Result<Event> {
        event.to_draft().validate()?;

        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        // Strictly increasing so two writes in the same millisecond stay ordered.
        let affected = tx.execute(
            "UPDATE events SET title = ?, description = ?, start_at = ?, end_at = ?,
                location = ?, all_day = ?, color = ?, status = ?, event_type = ?,
                visibility = ?, category_id = ?,
                last_modified_at = MAX(?, COALESCE(last_modified_at, created_at) + 1)
             WHERE id = ? AND owner_id = ?",
            params![
                event.title.trim(),
                event.description,
                event.start_at.timestamp_millis(),
                event.end_at.timestamp_millis(),
                event.location,
                event.all_day,
                event.color,
                event.status.as_str(),
                event.event_type.as_str(),
                event.visibility.as_str(),
                event.category_id,
                now_millis(),
                event.id.get(),
                event.owner_id,
            ],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(event.id.to_string()));
        }
        replace_invitations(&tx, event.id, &event.invitations)?;

        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        let updated = tx.query_row(&sql, params![event.id.get()], row_to_event)?;
        let updated = with_invitations(&tx, Some(updated))?;
        tx.commit()?;

        updated.ok_or_else(|| Error::NotFound(event.id.to_string()))
    }

    async fn delete(&self, id: EventId, owner_id: UserId) -> Result<()> {
        let db = self.db.lock().await;
        let affected = db.connection().execute(
            "DELETE FROM events WHERE id = ? AND owner_id = ?",
            params![id.get(), owner_id],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get_public(&self) -> Result<Vec<Event>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE visibility = ? ORDER BY start_at, id"
        );
        query_events(db.connection(), &sql, params![Visibility::Public.as_str()])
    }

    async fn get_public_by_id(&self, id: EventId) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ? AND visibility = ?");
        let event = conn
            .query_row(
                &sql,
                params![id.get(), Visibility::Public.as_str()],
                row_to_event,
            )
            .optional()?;
        with_invitations(conn, event)
    }

    async fn find_joined_copy(
        &self,
        original_id: EventId,
        owner_id: UserId,
    ) -> Result<Option<Event>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE original_event_id = ? AND owner_id = ?
             ORDER BY id LIMIT 1"
        );
        let event = conn
            .query_row(&sql, params![original_id.get(), owner_id], row_to_event)
            .optional()?;
        with_invitations(conn, event)
    }
}

fn query_events(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let events = stmt
        .query_map(params, row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    events
        .into_iter()
        .map(|mut event| {
            event.invitations = load_invitations(conn, event.id)?;
            Ok(event)
        })
        .collect()
}

fn with_invitations(conn: &Connection, event: Option<Event>) -> Result<Option<Event>> {
    match event {
        Some(mut event) => {
            event.invitations = load_invitations(conn, event.id)?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

fn load_invitations(conn: &Connection, event_id: EventId) -> Result<Vec<Invitation>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, email, user_id FROM event_invitations WHERE event_id = ? ORDER BY position",
    )?;
    let invitations = stmt
        .query_map(params![event_id.get()], |row| {
            Ok(Invitation {
                name: row.get(0)?,
                email: row.get(1)?,
                user_id: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(invitations)
}

fn replace_invitations(
    conn: &Connection,
    event_id: EventId,
    invitations: &[Invitation],
) -> Result<()> {
    conn.execute(
        "DELETE FROM event_invitations WHERE event_id = ?",
        params![event_id.get()],
    )?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO event_invitations (event_id, position, name, email, user_id)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for (position, invitation) in invitations.iter().enumerate() {
        stmt.execute(params![
            event_id.get(),
            i64::try_from(position).unwrap_or(i64::MAX),
            invitation.name.trim(),
            invitation.email.trim(),
            invitation.user_id,
        ])?;
    }
    Ok(())
}

fn millis_to_datetime(index: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(index, millis))
}

fn parse_column<T>(index: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    value
        .parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let status: String = row.get(9)?;
    let event_type: String = row.get(10)?;
    let visibility: String = row.get(11)?;

    Ok(Event {
        id: EventId::new(row.get(0)?),
        owner_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start_at: millis_to_datetime(4, row.get(4)?)?,
        end_at: millis_to_datetime(5, row.get(5)?)?,
        location: row.get(6)?,
        all_day: row.get(7)?,
        color: row.get(8)?,
        status: parse_column(9, &status)?,
        event_type: crate::models::EventType::parse_lenient(&event_type),
        visibility: parse_column(11, &visibility)?,
        category_id: row.get(12)?,
        original_event_id: row.get::<_, Option<i64>>(13)?.map(EventId::new),
        invitations: Vec::new(),
        created_at: row.get(14)?,
        last_modified_at: row.get(15)?,
    })
}
