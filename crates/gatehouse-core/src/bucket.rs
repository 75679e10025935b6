//! Per-client token bucket.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A token bucket owned by the [`BucketRegistry`](crate::BucketRegistry).
///
/// The bucket starts full. Tokens are refilled lazily on every access,
/// proportionally to the time elapsed since the previous refill, and never
/// exceed the burst capacity. Token state and last-seen time each sit behind
/// their own short-held lock, so callers only ever go through [`allow`].
///
/// [`allow`]: ClientBucket::allow
#[derive(Debug)]
pub struct ClientBucket {
    key: String,
    rate: f64,
    burst: f64,
    state: Mutex<TokenState>,
    last_seen: Mutex<Instant>,
}

#[derive(Debug)]
struct TokenState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenState {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(burst);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

impl ClientBucket {
    pub(crate) fn new(key: String, rate: f64, burst: u32, now: Instant) -> Self {
        let burst = f64::from(burst);
        Self {
            key,
            rate,
            burst,
            state: Mutex::new(TokenState {
                tokens: burst,
                last_refill: now,
            }),
            last_seen: Mutex::new(now),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Attempts to consume one token. Returns `false` when the bucket is empty.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.refill(now, self.rate, self.burst);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after applying any pending refill.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now(), self.rate, self.burst);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.burst as u32
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Records an access at `now`. Never moves last-seen backwards.
    pub(crate) fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    /// How long the bucket has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }
}
