use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use todolisti_core::models::UserId;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<(ProtectedEndpoint, UserId), RateWindow>>>,
    window: Duration,
    sync_limit: u32,
    invite_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    Sync,
    Invite,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    invite_allowed: AtomicU64,
    invite_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub invite_allowed: u64,
    pub invite_limited: u64,
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
            config.sync_rate_limit_per_window,
            config.invite_rate_limit_per_window,
        )
    }

    fn new(window: Duration, sync_limit: u32, invite_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            sync_limit,
            invite_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &UserId) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Sync => self.sync_limit,
            ProtectedEndpoint::Invite => self.invite_limit,
        };

        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry((endpoint, *user_id)).or_insert(RateWindow {
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
                .as_secs();
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for protected endpoint",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            invite_allowed: self.metrics.invite_allowed.load(Ordering::Relaxed),
            invite_limited: self.metrics.invite_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::Sync, true) => &self.metrics.sync_allowed,
            (ProtectedEndpoint::Sync, false) => &self.metrics.sync_limited,
            (ProtectedEndpoint::Invite, true) => &self.metrics.invite_allowed,
            (ProtectedEndpoint::Invite, false) => &self.metrics.invite_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Invite => "invite",
        }
    }
}

/// Stable per-process hash so logs never carry raw user ids
pub fn user_fingerprint(user_id: &UserId) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2, 2);
        let user = UserId::new();

        limiter.check(ProtectedEndpoint::Sync, &user).await.unwrap();
        limiter.check(ProtectedEndpoint::Sync, &user).await.unwrap();

        let err = limiter
            .check(ProtectedEndpoint::Sync, &user)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, _)));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.sync_allowed, 2);
        assert_eq!(metrics.sync_limited, 1);
    }

    #[tokio::test]
    async fn endpoints_and_users_have_separate_windows() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);
        let alice = UserId::new();
        let bob = UserId::new();

        limiter.check(ProtectedEndpoint::Sync, &alice).await.unwrap();
        limiter.check(ProtectedEndpoint::Invite, &alice).await.unwrap();
        limiter.check(ProtectedEndpoint::Sync, &bob).await.unwrap();

        assert!(limiter.check(ProtectedEndpoint::Invite, &alice).await.is_err());
        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.invite_allowed, 1);
        assert_eq!(metrics.invite_limited, 1);
    }
}
