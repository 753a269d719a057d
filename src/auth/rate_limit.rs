use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;
use crate::AppState;

/// Limits for the magic-link endpoint
const AUTH_MAX_REQUESTS: u32 = 5;
const AUTH_WINDOW_SECS: u64 = 60;

/// What a key is being limited for. Keys from different purposes never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Chatbot,
    ContactForm,
    MagicLink,
}

impl Purpose {
    fn prefix(self) -> &'static str {
        match self {
            Purpose::Chatbot => "chatbot",
            Purpose::ContactForm => "contact",
            Purpose::MagicLink => "magic-link",
        }
    }

    pub fn key(self, client: &str) -> String {
        format!("{}:{}", self.prefix(), client)
    }
}

/// In-memory keyed rate limit store, scoped to the process lifetime.
///
/// Holds two kinds of entries: counting windows (`check_with_limits`) and
/// cooldown markers (`try_reserve` / `mark` / `remaining_cooldown`), where a marker rejects
/// further submissions until its window has elapsed. Entries are evicted by
/// `cleanup` once they are older than twice their own window.
#[derive(Clone, Default)]
pub struct RateLimitState {
    entries: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    window: Duration,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counting limiter. Returns Ok(remaining) or Err(retry_after) if limited.
    pub async fn check_with_limits(
        &self,
        key: &str,
        max_requests: u32,
        window_secs: u64,
    ) -> Result<u32, Duration> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);

        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
            window,
        });

        if now.duration_since(entry.window_start) >= entry.window {
            entry.count = 0;
            entry.window_start = now;
            entry.window = window;
        }

        if entry.count >= max_requests {
            let retry_after = entry
                .window
                .saturating_sub(now.duration_since(entry.window_start));
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(max_requests - entry.count)
    }

    /// Time left before `key` may submit again, if a live marker exists.
    /// Never writes; an expired marker is removed.
    pub async fn remaining_cooldown(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let remaining = entries.get(key).map(|entry| {
            entry
                .window
                .saturating_sub(now.duration_since(entry.window_start))
        })?;

        if remaining.is_zero() {
            entries.remove(key);
            None
        } else {
            Some(remaining)
        }
    }

    /// Claim `key` for a submission: fails with the time left while a marker
    /// is live, otherwise writes a fresh marker under the same lock. A claim
    /// that does not lead to a submission must be given back with `release`.
    pub async fn try_reserve(&self, key: &str, window_secs: u64) -> Result<(), Duration> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if let Some(entry) = entries.get(key) {
            let remaining = entry
                .window
                .saturating_sub(now.duration_since(entry.window_start));
            if !remaining.is_zero() {
                return Err(remaining);
            }
        }

        entries.insert(
            key.to_string(),
            RateLimitEntry {
                count: 1,
                window_start: now,
                window: Duration::from_secs(window_secs),
            },
        );
        Ok(())
    }

    /// Drop the marker for `key`, if any.
    pub async fn release(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    /// (Re)write the cooldown marker for `key` with the current time.
    pub async fn mark(&self, key: &str, window_secs: u64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            RateLimitEntry {
                count: 1,
                window_start: Instant::now(),
                window: Duration::from_secs(window_secs),
            },
        );
    }

    /// Drop entries older than twice their window.
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();

        entries.retain(|_, entry| now.duration_since(entry.window_start) < entry.window * 2);
        before - entries.len()
    }
}

/// Whole seconds left, rounded up so a live cooldown never reports 0.
pub fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

pub fn spawn_rate_limit_cleanup_worker(limiter: RateLimitState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            let evicted = limiter.cleanup().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Rate limit cleanup: evicted stale entries");
            }
        }
    });
}

/// Rate limiting middleware for the magic-link endpoint
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = addr.ip().to_string();
    let key = Purpose::MagicLink.key(&ip);

    match state
        .rate_limiter
        .check_with_limits(&key, AUTH_MAX_REQUESTS, AUTH_WINDOW_SECS)
        .await
    {
        Ok(remaining) => {
            tracing::debug!(ip = %ip, remaining = remaining, "Rate limit check passed");
            Ok(next.run(req).await)
        }
        Err(retry_after) => {
            let secs = ceil_secs(retry_after);
            tracing::warn!(ip = %ip, retry_after_secs = secs, "Rate limit exceeded");
            Err(AppError::RateLimited {
                retry_after_secs: secs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limit_allows_under_limit() {
        let limiter = RateLimitState::new();

        for i in 0..AUTH_MAX_REQUESTS {
            let result = limiter
                .check_with_limits("test_key", AUTH_MAX_REQUESTS, AUTH_WINDOW_SECS)
                .await;
            assert!(result.is_ok(), "Request {} should be allowed", i + 1);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_over_limit() {
        let limiter = RateLimitState::new();

        for _ in 0..AUTH_MAX_REQUESTS {
            let _ = limiter
                .check_with_limits("test_key", AUTH_MAX_REQUESTS, AUTH_WINDOW_SECS)
                .await;
        }

        let result = limiter
            .check_with_limits("test_key", AUTH_MAX_REQUESTS, AUTH_WINDOW_SECS)
            .await;
        assert!(result.is_err(), "Request over limit should be blocked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_rejects_until_window_elapses() {
        let limiter = RateLimitState::new();
        let key = Purpose::Chatbot.key("10.0.0.1");

        assert!(limiter.remaining_cooldown(&key).await.is_none());
        limiter.mark(&key, 300).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        let remaining = limiter.remaining_cooldown(&key).await.expect("marker is live");
        assert_eq!(ceil_secs(remaining), 290);

        tokio::time::advance(Duration::from_secs(290)).await;
        assert!(limiter.remaining_cooldown(&key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_admits_one_claim_per_window() {
        let limiter = RateLimitState::new();
        let key = Purpose::ContactForm.key("10.0.0.2");

        assert!(limiter.try_reserve(&key, 180).await.is_ok());
        let retry = limiter.try_reserve(&key, 180).await.unwrap_err();
        assert_eq!(ceil_secs(retry), 180);

        tokio::time::advance(Duration::from_secs(180)).await;
        assert!(limiter.try_reserve(&key, 180).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_claim_can_be_retaken() {
        let limiter = RateLimitState::new();
        let key = Purpose::Chatbot.key("10.0.0.3");

        limiter.try_reserve(&key, 300).await.unwrap();
        limiter.release(&key).await;

        assert!(limiter.remaining_cooldown(&key).await.is_none());
        assert!(limiter.try_reserve(&key, 300).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purposes_do_not_share_markers() {
        let limiter = RateLimitState::new();
        limiter.mark(&Purpose::Chatbot.key("ip"), 300).await;

        assert!(limiter
            .remaining_cooldown(&Purpose::ContactForm.key("ip"))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_after_twice_the_window() {
        let limiter = RateLimitState::new();
        limiter.mark("short", 10).await;
        limiter.mark("long", 300).await;

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(limiter.cleanup().await, 1);
        assert!(limiter.remaining_cooldown("long").await.is_some());
    }

    #[test]
    fn test_ceil_secs_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
    }
}
