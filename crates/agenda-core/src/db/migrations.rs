//! Database migrations

use rusqlite::{params, Connection};

use super::connection::Schema;
use crate::error::Result;

/// One schema version: statements applied in a single transaction.
type Migration = &'static [&'static str];

const SERVER_MIGRATIONS: &[Migration] = &[
    // v1: events and invitations
    &[
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            start_at INTEGER NOT NULL,
            end_at INTEGER NOT NULL,
            location TEXT,
            all_day INTEGER NOT NULL DEFAULT 0,
            color TEXT NOT NULL,
            status TEXT NOT NULL,
            event_type TEXT NOT NULL,
            visibility TEXT NOT NULL,
            category_id INTEGER,
            original_event_id INTEGER,
            created_at INTEGER NOT NULL,
            last_modified_at INTEGER,
            CHECK (end_at >= start_at)
        )",
        "CREATE INDEX IF NOT EXISTS idx_events_owner_start ON events(owner_id, start_at)",
        "CREATE INDEX IF NOT EXISTS idx_events_visibility ON events(visibility)",
        "CREATE INDEX IF NOT EXISTS idx_events_original ON events(original_event_id, owner_id)",
        "CREATE TABLE IF NOT EXISTS event_invitations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            user_id INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS idx_invitations_event ON event_invitations(event_id)",
    ],
    // v2: at most one joined copy per user and original
    &[
        "DROP INDEX IF EXISTS idx_events_original",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_original
            ON events(original_event_id, owner_id)",
    ],
];

const CLIENT_MIGRATIONS: &[Migration] = &[
    // v1: pending queue and offline cache
    &[
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS pending_operations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_pending_order ON pending_operations(enqueued_at, seq)",
        "CREATE INDEX IF NOT EXISTS idx_pending_target ON pending_operations(target_id)",
        "CREATE TABLE IF NOT EXISTS cached_events (
            id INTEGER PRIMARY KEY,
            start_at INTEGER NOT NULL,
            body TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_cached_events_start ON cached_events(start_at)",
        "CREATE TABLE IF NOT EXISTS local_sequence (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
    ],
    // v2: LWW conflict log and dead letters
    &[
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            local_timestamp INTEGER NOT NULL,
            server_timestamp INTEGER NOT NULL,
            local_payload TEXT NOT NULL,
            server_payload TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_event_id ON sync_conflicts(event_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_recorded_at ON sync_conflicts(recorded_at DESC)",
        "CREATE TABLE IF NOT EXISTS dead_letters (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            reason TEXT NOT NULL,
            failed_at INTEGER NOT NULL
        )",
    ],
];

const fn migrations_for(schema: Schema) -> &'static [Migration] {
    match schema {
        Schema::Server => SERVER_MIGRATIONS,
        Schema::Client => CLIENT_MIGRATIONS,
    }
}

/// Run all pending migrations
pub fn run(conn: &mut Connection, schema: Schema) -> Result<()> {
    let version = get_version(conn)?;

    for (index, statements) in migrations_for(schema).iter().enumerate() {
        let target = i64::try_from(index).unwrap_or(i64::MAX) + 1;
        if version < target {
            apply(conn, target, statements)?;
            tracing::info!(?schema, version = target, "Migrated database");
        }
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply(conn: &mut Connection, version: i64, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for statement in statements {
        tx.execute_batch(statement)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![version],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latest(schema: Schema) -> i64 {
        i64::try_from(migrations_for(schema).len()).unwrap()
    }

    #[test]
    fn test_migrations() {
        for schema in [Schema::Server, Schema::Client] {
            let mut conn = Connection::open_in_memory().unwrap();
            run(&mut conn, schema).unwrap();
            assert_eq!(get_version(&conn).unwrap(), latest(schema));
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, Schema::Client).unwrap();
        run(&mut conn, Schema::Client).unwrap(); // Should not fail

        assert_eq!(get_version(&conn).unwrap(), latest(Schema::Client));
    }

    #[test]
    fn test_server_v2_rejects_second_joined_copy() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, Schema::Server).unwrap();

        let insert = "INSERT INTO events (owner_id, title, start_at, end_at, color, status,
                event_type, visibility, original_event_id, created_at)
             VALUES (?, 'Meetup', 0, 0, '#fff', 'scheduled', 'other', 'private', ?, 0)";
        conn.execute(insert, params![2, 7]).unwrap();
        conn.execute(insert, params![3, 7]).unwrap();
        assert!(conn.execute(insert, params![2, 7]).is_err());
        // Plain events carry no original and never collide.
        conn.execute(insert, params![2, Option::<i64>::None]).unwrap();
        conn.execute(insert, params![2, Option::<i64>::None]).unwrap();
    }

    #[test]
    fn test_client_v2_creates_conflict_log() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, Schema::Client).unwrap();

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = 'sync_conflicts'
                )",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(exists);
    }
}
