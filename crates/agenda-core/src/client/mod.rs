//! Offline-first client session

mod session;

pub use session::{Session, SessionTasks};
