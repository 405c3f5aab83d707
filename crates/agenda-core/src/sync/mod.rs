//! Offline synchronization: conflict policy, remote API, connectivity,
//! replay engine and real-time reconciliation.

mod connectivity;
mod engine;
mod notice;
mod policy;
mod reconciler;
mod remote;
#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{ConnectivityMonitor, ConnectivityState, LinkState, MonitorHandle};
pub use engine::{SyncEngine, SyncOutcome, SyncReport, DEFAULT_MAX_ATTEMPTS};
pub use notice::{ClientNotice, NOTICE_CHANNEL_CAPACITY};
pub use policy::{ConflictPolicy, Verdict};
pub use reconciler::{ClientReconciler, EntryStatus, PendingKind, PushOutcome};
pub use remote::{HealthProbe, HttpEventApi, RemoteEventApi, RemoteResult};
