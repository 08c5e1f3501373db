use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::connectors::ConnectorResult;

/// Smallest margin kept before a token's expiry, whatever is configured.
pub const MIN_REFRESH_SKEW: Duration = Duration::from_secs(1);

/// Short-lived bearer token issued after the certificate handshake.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Count the lifetime from when the token was requested. The issuer
    /// starts its clock no later than that, so request latency is never
    /// credited to the token.
    fn anchored_at(mut self, requested_at: Instant) -> Self {
        self.expires_at = requested_at + self.ttl;
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Usable when it outlives `now` by more than the refresh skew. A token
    /// is never handed out at or after its expiry.
    fn is_fresh(&self, now: Instant, skew: Duration) -> bool {
        now + skew < self.expires_at
    }
}

/// Caches one token and refreshes it ahead of expiry.
///
/// The lock is held across the refresh, so concurrent callers wait for a
/// single token request instead of each issuing their own.
#[derive(Debug)]
pub struct TokenCache {
    current: Mutex<Option<AccessToken>>,
    refresh_skew: Duration,
}

impl TokenCache {
    pub fn new(refresh_skew: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            refresh_skew: refresh_skew.max(MIN_REFRESH_SKEW),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> ConnectorResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectorResult<AccessToken>>,
    {
        let mut guard = self.current.lock().await;
        if let Some(token) = guard.as_ref()
            && token.is_fresh(Instant::now(), self.refresh_skew)
        {
            return Ok(token.value.clone());
        }
        *guard = None;
        let requested_at = Instant::now();
        let token = fetch().await?.anchored_at(requested_at);
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fetch_counted(
        counter: &AtomicUsize,
        ttl: Duration,
    ) -> ConnectorResult<AccessToken> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken::new(format!("token-{n}"), ttl))
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_token_until_refresh_window() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(300);

        let first = cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        let second = cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        assert_eq!(first, second);

        // Inside the skew window: refreshed before expiry.
        tokio::time::advance(Duration::from_secs(45)).await;
        let third = cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        assert_eq!(third, "token-2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_is_never_reused_even_without_skew() {
        let cache = TokenCache::new(Duration::ZERO);
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(10);

        cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let next = cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        assert_eq!(next, "token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_token_response_does_not_extend_its_lifetime() {
        let cache = TokenCache::new(Duration::ZERO);
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(10);

        cache
            .get_or_refresh(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                fetch_counted(&fetches, ttl).await
            })
            .await
            .unwrap();
        // Issued at t=0 for 10s; at t=9 only the one second floor remains.
        tokio::time::advance(Duration::from_secs(6)).await;
        let next = cache
            .get_or_refresh(|| fetch_counted(&fetches, ttl))
            .await
            .unwrap();
        assert_eq!(next, "token-2");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(1)));
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        fetch_counted(&fetches, Duration::from_secs(600)).await
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
