/// Per-user rate limiting
///
/// Token bucket per authenticated user, held in process memory. The bucket
/// holds `RATE_LIMIT_REQUESTS` tokens and refills evenly over
/// `RATE_LIMIT_WINDOW_SECS`.
///
/// # Algorithm
///
/// - Tokens refill at a constant rate
/// - Each request consumes 1 token
/// - Request rejected with 429 if the bucket is empty
///
/// # Headers
///
/// - `X-RateLimit-Limit`: bucket capacity
/// - `X-RateLimit-Remaining`: whole tokens left
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use advocate_shared::auth::AuthContext;
use axum::{
    extract::{Extension, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Buckets idle for this many windows are dropped during pruning
const IDLE_WINDOWS: u32 = 2;

/// Pruning runs when the map grows past this size
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a new full bucket
    fn new(capacity: u32, now: Instant) -> Self {
        TokenBucket {
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    /// Refills tokens based on elapsed time
    fn refill(&mut self, rate: f64, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity as f64);
        self.last_refill = now;
    }

    /// Attempts to consume N tokens
    fn try_consume(&mut self, count: f64) -> bool {
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }

    /// Calculates seconds until N tokens available
    fn seconds_until_available(&self, count: f64, rate: f64) -> u64 {
        let deficit = count - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / rate).ceil() as u64
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub ok: bool,
    pub remaining: u32,

    /// Seconds until a request would be allowed again
    pub retry_after: u64,
}

/// In-memory token buckets keyed by user
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            capacity: config.requests.max(1),
            window: Duration::from_secs(config.window_secs.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens per second
    fn refill_rate(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64()
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consumes one token for `key` at `now`
    pub fn check(&self, key: &str, now: Instant) -> RateLimitResult {
        let rate = self.refill_rate();
        let mut buckets = self.buckets();

        if buckets.len() > PRUNE_THRESHOLD {
            let idle = self.window * IDLE_WINDOWS;
            buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < idle);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        bucket.refill(rate, self.capacity, now);

        if bucket.try_consume(1.0) {
            RateLimitResult {
                ok: true,
                remaining: bucket.tokens.floor() as u32,
                retry_after: 0,
            }
        } else {
            RateLimitResult {
                ok: false,
                remaining: 0,
                retry_after: bucket.seconds_until_available(1.0, rate).max(1),
            }
        }
    }
}

/// Rate limiting middleware layer
///
/// Runs after authentication; the caller's user id is the bucket key.
///
/// # Errors
///
/// - 429 Too Many Requests: Rate limit exceeded
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limiter = &state.rate_limiter;
    let result = limiter.check(&auth.user_id, Instant::now());

    if !result.ok {
        tracing::warn!(user_id = %auth.user_id, retry_after = result.retry_after, "Rate limit exceeded");
        return Err(ApiError::RateLimitExceeded {
            retry_after: result.retry_after,
            message: format!(
                "Too many requests. Try again in {} seconds",
                result.retry_after
            ),
        });
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.capacity()));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests,
            window_secs,
        })
    }

    #[test]
    fn test_token_bucket_consume() {
        let mut bucket = TokenBucket::new(10, Instant::now());
        assert!(bucket.try_consume(1.0));
        assert_eq!(bucket.tokens, 9.0);
        assert!(bucket.try_consume(5.0));
        assert_eq!(bucket.tokens, 4.0);
        assert!(!bucket.try_consume(10.0));
        assert_eq!(bucket.tokens, 4.0); // Unchanged after failed attempt
    }

    #[test]
    fn test_token_bucket_refill_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket {
            tokens: 95.0,
            last_refill: start,
        };

        bucket.refill(1.0, 100, start + Duration::from_secs(10));
        assert_eq!(bucket.tokens, 100.0);
    }

    #[test]
    fn test_token_bucket_seconds_until_available() {
        let bucket = TokenBucket {
            tokens: 2.0,
            last_refill: Instant::now(),
        };

        // Need 5 tokens, have 2, rate is 1/sec -> need 3 seconds
        assert_eq!(bucket.seconds_until_available(5.0, 1.0), 3);
        assert_eq!(bucket.seconds_until_available(1.0, 1.0), 0);
    }

    #[test]
    fn test_limiter_blocks_after_capacity() {
        let limiter = limiter(3, 60);
        let now = Instant::now();

        assert_eq!(limiter.check("alice", now).remaining, 2);
        assert_eq!(limiter.check("alice", now).remaining, 1);
        assert_eq!(limiter.check("alice", now).remaining, 0);

        let blocked = limiter.check("alice", now);
        assert!(!blocked.ok);
        // 3 tokens per 60s -> one token every 20s
        assert_eq!(blocked.retry_after, 20);

        // Other users have their own bucket
        assert!(limiter.check("bob", now).ok);
    }

    #[test]
    fn test_limiter_refills_over_time() {
        let limiter = limiter(2, 10);
        let now = Instant::now();

        assert!(limiter.check("alice", now).ok);
        assert!(limiter.check("alice", now).ok);
        assert!(!limiter.check("alice", now).ok);

        assert!(limiter.check("alice", now + Duration::from_secs(5)).ok);
    }
}
