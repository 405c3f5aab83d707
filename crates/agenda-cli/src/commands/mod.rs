pub mod add;
pub mod common;
pub mod completions;
pub mod delete;
pub mod list;
pub mod public;
pub mod sync;
pub mod update;
pub mod watch;
