//! Token-bucket rate shapers.
//!
//! An `Endpoint` owns three of these: `requestRate` (whole requests/sec,
//! consumed once per attempt before dispatch), `sendRate` and `recvRate`
//! (outbound/inbound bytes/sec, passed through to the connector so it can
//! shape the HTTP exchange). Tokens are refilled lazily on `acquire` rather
//! than by a background tick task, since an `Endpoint` needs exactly one
//! bucket per shaper rather than a map of many keyed by client identity.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket limiting some quantity to `rate_per_second` units/sec,
/// with burst capacity equal to one second's worth of tokens. A
/// `rate_per_second` of `0.0` disables limiting entirely (`acquire` is then
/// a no-op), matching the knob convention that `0` means "unlimited" for
/// the byte-rate shapers.
pub struct RateLimiter {
    state: Mutex<Bucket>,
    capacity: f64,
    rate_per_second: f64,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64) -> Self {
        let capacity = if rate_per_second > 0.0 { rate_per_second } else { 0.0 };
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            rate_per_second,
        }
    }

    /// A limiter that never blocks `acquire`.
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Waits until `amount` tokens are available, then consumes them. A
    /// no-op when this limiter is unlimited or `amount` is zero.
    pub async fn acquire(&self, amount: f64) {
        if self.rate_per_second <= 0.0 || amount <= 0.0 {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= amount {
                    bucket.tokens -= amount;
                    None
                } else {
                    let deficit = amount - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate_per_second))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}
