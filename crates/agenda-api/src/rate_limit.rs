use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agenda_core::util::user_fingerprint;
use agenda_core::UserId;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<(ProtectedEndpoint, UserId), RateWindow>>>,
    window: Duration,
    mutation_limit: u32,
    batch_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    Mutation,
    BatchSync,
}

#[derive(Default)]
struct RateLimitMetrics {
    mutation_allowed: AtomicU64,
    mutation_limited: AtomicU64,
    batch_allowed: AtomicU64,
    batch_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub mutation_allowed: u64,
    pub mutation_limited: u64,
    pub batch_allowed: u64,
    pub batch_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.mutation_rate_limit_per_window,
            config.batch_sync_rate_limit_per_window,
        )
    }

    fn new(window: Duration, mutation_limit: u32, batch_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            mutation_limit,
            batch_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(
        &self,
        endpoint: ProtectedEndpoint,
        user_id: UserId,
    ) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Mutation => self.mutation_limit,
            ProtectedEndpoint::BatchSync => self.batch_limit,
        };

        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry((endpoint, user_id)).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("rate limit exceeded for {}", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            mutation_allowed: self.metrics.mutation_allowed.load(Ordering::Relaxed),
            mutation_limited: self.metrics.mutation_limited.load(Ordering::Relaxed),
            batch_allowed: self.metrics.batch_allowed.load(Ordering::Relaxed),
            batch_limited: self.metrics.batch_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::Mutation, true) => &self.metrics.mutation_allowed,
            (ProtectedEndpoint::Mutation, false) => &self.metrics.mutation_limited,
            (ProtectedEndpoint::BatchSync, true) => &self.metrics.batch_allowed,
            (ProtectedEndpoint::BatchSync, false) => &self.metrics.batch_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Mutation => "event_mutation",
            Self::BatchSync => "batch_sync",
        }
    }
}
