//! Reachability tracking for the agenda API

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::remote::HealthProbe;

const TRANSITION_CHANNEL_CAPACITY: usize = 16;

/// Whether the API is currently considered reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Local transport signal reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Two-state machine driven by local link signals and periodic health probes.
///
/// Starts `Offline`. `Online` is only declared after a successful probe.
/// Subscribers see each transition exactly once.
pub struct ConnectivityMonitor {
    probe: Arc<dyn HealthProbe>,
    state: watch::Sender<ConnectivityState>,
    transitions: broadcast::Sender<ConnectivityState>,
    link_up: AtomicBool,
    interval: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("link_up", &self.link_up.load(Ordering::SeqCst))
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, interval: Duration, timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectivityState::Offline);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            probe,
            state,
            transitions,
            link_up: AtomicBool::new(true),
            interval,
            timeout,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Receive every Online/Offline transition
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.transitions.subscribe()
    }

    /// Probe the API once and update the state.
    ///
    /// While the local link is down no probe is issued and the state stays
    /// `Offline`.
    pub async fn check_now(&self) -> ConnectivityState {
        if !self.link_up.load(Ordering::SeqCst) {
            self.transition(ConnectivityState::Offline);
            return ConnectivityState::Offline;
        }

        let next = match tokio::time::timeout(self.timeout, self.probe.probe()).await {
            Ok(Ok(())) => ConnectivityState::Online,
            Ok(Err(error)) => {
                tracing::debug!(%error, "Health probe failed");
                ConnectivityState::Offline
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.timeout, "Health probe timed out");
                ConnectivityState::Offline
            }
        };

        // The link may have dropped while the probe was in flight.
        if next.is_online() && !self.link_up.load(Ordering::SeqCst) {
            return self.state();
        }

        self.transition(next);
        next
    }

    /// Feed a local link signal. Link-down forces `Offline` immediately;
    /// link-up triggers a probe.
    pub async fn set_link_state(&self, link: LinkState) -> ConnectivityState {
        match link {
            LinkState::Down => {
                self.link_up.store(false, Ordering::SeqCst);
                self.transition(ConnectivityState::Offline);
                ConnectivityState::Offline
            }
            LinkState::Up => {
                self.link_up.store(true, Ordering::SeqCst);
                self.check_now().await
            }
        }
    }

    /// A request failed with a connectivity-class error.
    pub fn report_unreachable(&self) {
        self.transition(ConnectivityState::Offline);
    }

    /// Start periodic probing on the tokio runtime. Probing stops when the
    /// returned handle is dropped.
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stopped.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.check_now().await;
                    }
                }
            }
            tracing::debug!("Connectivity monitor stopped");
        });

        MonitorHandle {
            cancel,
            task: Some(task),
        }
    }

    fn transition(&self, next: ConnectivityState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            tracing::info!(state = ?next, "Connectivity changed");
            // No subscribers is fine.
            let _ = self.transitions.send(next);
        }
        changed
    }
}

/// Owns the probing task; dropping it stops the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop probing and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "Connectivity monitor task failed");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::error::RemoteError;
    use crate::sync::remote::RemoteResult;

    #[derive(Default)]
    struct ScriptedProbe {
        healthy: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> RemoteResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RemoteError::Unreachable("connection refused".to_string()))
            }
        }
    }

    fn monitor(probe: &Arc<ScriptedProbe>) -> Arc<ConnectivityMonitor> {
        Arc::new(ConnectivityMonitor::new(
            Arc::clone(probe) as Arc<dyn HealthProbe>,
            Duration::from_secs(5),
            Duration::from_secs(3),
        ))
    }

    fn drain(receiver: &mut broadcast::Receiver<ConnectivityState>) -> Vec<ConnectivityState> {
        let mut seen = Vec::new();
        while let Ok(state) = receiver.try_recv() {
            seen.push(state);
        }
        seen
    }

    #[tokio::test]
    async fn starts_offline_and_goes_online_after_probe() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.healthy.store(true, Ordering::SeqCst);
        let monitor = monitor(&probe);
        assert_eq!(monitor.state(), ConnectivityState::Offline);

        assert_eq!(monitor.check_now().await, ConnectivityState::Online);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn notifies_once_per_transition() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.healthy.store(true, Ordering::SeqCst);
        let monitor = monitor(&probe);
        let mut transitions = monitor.subscribe();

        monitor.check_now().await;
        monitor.check_now().await;
        monitor.check_now().await;
        probe.healthy.store(false, Ordering::SeqCst);
        monitor.check_now().await;
        monitor.check_now().await;

        assert_eq!(
            drain(&mut transitions),
            vec![ConnectivityState::Online, ConnectivityState::Offline]
        );
    }

    #[tokio::test]
    async fn link_down_forces_offline_without_probing() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.healthy.store(true, Ordering::SeqCst);
        let monitor = monitor(&probe);
        monitor.check_now().await;
        let calls = probe.calls.load(Ordering::SeqCst);

        assert_eq!(
            monitor.set_link_state(LinkState::Down).await,
            ConnectivityState::Offline
        );
        assert_eq!(monitor.check_now().await, ConnectivityState::Offline);
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);

        assert_eq!(
            monitor.set_link_state(LinkState::Up).await,
            ConnectivityState::Online
        );
    }

    #[tokio::test]
    async fn link_up_is_not_sufficient_when_probe_fails() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor(&probe);

        assert_eq!(
            monitor.set_link_state(LinkState::Up).await,
            ConnectivityState::Offline
        );
    }

    #[tokio::test(start_paused = true)]
    async fn probe_timeout_counts_as_offline() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.healthy.store(true, Ordering::SeqCst);
        let monitor = monitor(&probe);
        monitor.check_now().await;
        assert!(monitor.is_online());

        probe.hang.store(true, Ordering::SeqCst);
        assert_eq!(monitor.check_now().await, ConnectivityState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_probe_detects_recovery_and_stops_on_drop() {
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = monitor(&probe);
        let mut transitions = monitor.subscribe();
        let handle = monitor.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.state(), ConnectivityState::Offline);

        probe.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transitions.recv().await.unwrap(), ConnectivityState::Online);

        drop(handle);
        tokio::task::yield_now().await;
        let calls = probe.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }
}
