//! Per-connection token bucket for presence publishes.

use std::time::Duration;

use dashmap::DashMap;
use huddle_core::{CollabError, PeerId};
use tokio::time::Instant;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

/// Bounds how often each connection may publish presence.
///
/// A bucket holds up to `burst` tokens and refills continuously at
/// `refill_per_sec`. A publish spends one token; with none left the publish
/// is rejected and the caller is told how long until the next token.
#[derive(Debug)]
pub struct PublishLimiter {
    buckets: DashMap<PeerId, TokenBucket>,
    burst: f64,
    refill_per_sec: f64,
}

impl PublishLimiter {
    /// Create a limiter. `refill_per_sec` must be positive.
    pub fn new(burst: u32, refill_per_sec: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            burst: f64::from(burst.max(1)),
            refill_per_sec,
        }
    }

    /// Spend one token for `peer`.
    pub fn try_acquire(&self, peer: &PeerId) -> Result<(), CollabError> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(peer.clone()).or_insert(TokenBucket {
            tokens: self.burst,
            last: now,
        });

        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let wait = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(CollabError::RateLimited {
            retry_after: Duration::try_from_secs_f64(wait).unwrap_or(Duration::from_secs(1)),
        })
    }

    /// Drop a departed connection's bucket.
    pub fn forget(&self, peer: &PeerId) {
        let _ = self.buckets.remove(peer);
    }

    /// Connections with a live bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn burst_then_reject() {
        let limiter = PublishLimiter::new(3, 1.0);
        let peer = PeerId::from("p");
        for _ in 0..3 {
            limiter.try_acquire(&peer).unwrap();
        }
        assert_matches!(
            limiter.try_acquire(&peer),
            Err(CollabError::RateLimited { retry_after }) if retry_after <= Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let limiter = PublishLimiter::new(1, 2.0);
        let peer = PeerId::from("p");
        limiter.try_acquire(&peer).unwrap();
        assert!(limiter.try_acquire(&peer).is_err());

        tokio::time::advance(Duration::from_millis(500)).await;
        limiter.try_acquire(&peer).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_burst() {
        let limiter = PublishLimiter::new(2, 10.0);
        let peer = PeerId::from("p");
        limiter.try_acquire(&peer).unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        limiter.try_acquire(&peer).unwrap();
        limiter.try_acquire(&peer).unwrap();
        assert!(limiter.try_acquire(&peer).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_hint_reflects_deficit() {
        let limiter = PublishLimiter::new(1, 4.0);
        let peer = PeerId::from("p");
        limiter.try_acquire(&peer).unwrap();
        let Err(CollabError::RateLimited { retry_after }) = limiter.try_acquire(&peer) else {
            panic!("expected rate limit");
        };
        assert_eq!(retry_after, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_per_connection() {
        let limiter = PublishLimiter::new(1, 1.0);
        limiter.try_acquire(&PeerId::from("a")).unwrap();
        limiter.try_acquire(&PeerId::from("b")).unwrap();
        assert!(limiter.try_acquire(&PeerId::from("a")).is_err());
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_resets_bucket() {
        let limiter = PublishLimiter::new(1, 1.0);
        let peer = PeerId::from("p");
        limiter.try_acquire(&peer).unwrap();
        limiter.forget(&peer);
        assert_eq!(limiter.tracked(), 0);
        limiter.try_acquire(&peer).unwrap();
    }
}
