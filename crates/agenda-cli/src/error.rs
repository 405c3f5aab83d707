use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] agenda_core::Error),
    #[error(transparent)]
    Config(#[from] agenda_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Event not found: {0}")]
    EventNotFound(String),
    #[error("Real-time connection failed: {0}")]
    Realtime(String),
    #[error("The server is unreachable; `{0}` needs a connection")]
    Offline(&'static str),
    #[error("Could not resolve a data directory; pass --db-path or set AGENDA_DB_PATH")]
    NoDataDir,
}
