//! Token-bucket limiter used by the per-route concurrency gate.
//!
//! The bucket is kept as a single atomic "theoretical arrival time" (the
//! GCRA formulation of a token bucket): a burst of `count` takes is admitted
//! immediately, after which one take is admitted every `interval / count`.
//! A take reserves its slot with one CAS and then sleeps until the slot
//! opens, so there is no lock on the hot path and waiters are served in
//! reservation order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// The limiter installed on a gate.
#[derive(Debug)]
pub enum Limiter {
    /// No rate configured (or the configuration was invalid).
    Unlimited,
    Bucket(TokenBucket),
}

impl Limiter {
    /// Build from a `(rate, interval)` pair. A non-positive rate or an
    /// unparseable interval yields [`Limiter::Unlimited`].
    pub fn from_spec(rate: i64, interval: &str) -> Self {
        if rate <= 0 {
            return Limiter::Unlimited;
        }
        let interval = match humantime::parse_duration(interval.trim()) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) => return Limiter::Unlimited,
            Err(e) => {
                tracing::warn!(
                    interval = %interval,
                    error = %e,
                    "Invalid rate interval, installing unlimited limiter"
                );
                return Limiter::Unlimited;
            }
        };
        let count = u32::try_from(rate).unwrap_or(u32::MAX);
        Limiter::Bucket(TokenBucket::new(count, interval))
    }

    /// Wait until one token is available and consume it.
    pub async fn take(&self) {
        if let Limiter::Bucket(bucket) = self {
            bucket.take().await;
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limiter::Unlimited)
    }
}

/// `count` tokens per `interval`, with a burst capacity of `count`.
#[derive(Debug)]
pub struct TokenBucket {
    epoch: Instant,
    /// Nanoseconds between two tokens.
    emission_ns: u64,
    /// How far ahead of `now` the arrival time may run (burst capacity).
    tolerance_ns: u64,
    /// Theoretical arrival time of the next token, relative to `epoch`.
    tat_ns: AtomicU64,
}

impl TokenBucket {
    pub fn new(count: u32, interval: Duration) -> Self {
        let count = u64::from(count.max(1));
        let interval_ns = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
        let emission_ns = (interval_ns / count).max(1);
        Self {
            epoch: Instant::now(),
            emission_ns,
            tolerance_ns: emission_ns.saturating_mul(count),
            tat_ns: AtomicU64::new(0),
        }
    }

    /// Time between two tokens.
    pub fn emission_interval(&self) -> Duration {
        Duration::from_nanos(self.emission_ns)
    }

    /// Reserve the next token and return how long the caller must wait for it.
    pub fn reserve(&self) -> Duration {
        let now = self.now_ns();
        let mut tat = self.tat_ns.load(Ordering::Acquire);
        loop {
            let next = tat.max(now).saturating_add(self.emission_ns);
            match self
                .tat_ns
                .compare_exchange_weak(tat, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let admit_at = next.saturating_sub(self.tolerance_ns);
                    return Duration::from_nanos(admit_at.saturating_sub(now));
                }
                Err(actual) => tat = actual,
            }
        }
    }

    /// Wait until a token is available.
    pub async fn take(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}
