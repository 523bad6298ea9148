use crate::config::Property;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Token bucket shared by every consumer of one source cluster: the fetcher
/// takes a token per long-poll RPC, and any other local caller of the
/// source's admin surface draws from the same bucket.
///
/// The QPS knob is dynamic. Quotas are immutable once built, so the inner
/// limiter is swapped for a fresh one whenever the observed knob value
/// differs from the one it was built with; accumulated burst is forgotten
/// on such a change.
pub struct SourceRateLimiter {
    qps: Property<u32>,
    inner: Mutex<(u32, Arc<DefaultDirectRateLimiter>)>,
}

impl SourceRateLimiter {
    pub fn new(qps: Property<u32>) -> Self {
        let initial = qps.get();
        Self {
            qps,
            inner: Mutex::new((initial, Self::build(initial))),
        }
    }

    fn build(qps: u32) -> Arc<DefaultDirectRateLimiter> {
        let qps = NonZeroU32::new(qps).unwrap_or(NonZeroU32::MIN);
        Arc::new(RateLimiter::direct(Quota::per_second(qps)))
    }

    fn current(&self) -> Arc<DefaultDirectRateLimiter> {
        let qps = self.qps.get();
        // Non-async lock, never held across an await point.
        let mut guard = self.inner.lock().unwrap();
        if guard.0 != qps {
            tracing::debug!(qps, "rebuilding source rate limiter");
            *guard = (qps, Self::build(qps));
        }
        guard.1.clone()
    }

    /// Wait for one token. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let limiter = self.current();
        tokio::select! {
            () = cancel.cancelled() => false,
            () = limiter.until_ready() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn acquires_within_quota() {
        let limiter = SourceRateLimiter::new(Property::new(1000));
        let cancel = CancellationToken::new();
        for _ in 0..10 {
            assert!(limiter.acquire(&cancel).await);
        }
    }

    #[tokio::test]
    async fn blocks_once_exhausted() {
        // Quota of 1/s has burst 1: the second acquire must wait.
        let limiter = SourceRateLimiter::new(Property::new(1));
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);

        let started = Instant::now();
        let waited = tokio::time::timeout(Duration::from_millis(50), async {
            limiter.acquire(&cancel).await
        })
        .await;
        assert!(waited.is_err(), "second token arrived in {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_acquire() {
        let limiter = SourceRateLimiter::new(Property::new(1));
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);

        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }

    #[tokio::test]
    async fn qps_change_rebuilds_the_bucket() {
        let qps = Property::new(1);
        let limiter = SourceRateLimiter::new(qps.clone());
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);

        // Raising the quota takes effect on the next acquire.
        qps.set(1000);
        assert!(limiter.acquire(&cancel).await);
    }
}
