//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use super::migrations;
use crate::error::Result;

/// Which set of tables a database file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Authoritative event store used by the API server
    Server,
    /// Pending-operation queue, offline cache and conflict log used by clients
    Client,
}

/// Database wrapper for `SQLite` connections
pub struct Database {
    conn: Connection,
    schema: Schema,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn, schema)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory(schema: Schema) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, schema)
    }

    fn initialize(conn: Connection, schema: Schema) -> Result<Self> {
        let mut database = Self { conn, schema };
        database.configure()?;
        migrations::run(&mut database.conn, schema)?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the result.
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for transactions
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
