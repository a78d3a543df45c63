//! Backoff policy (§4.1). Stateless `wait_for(n)` functions composed with a
//! monotonic failure counter owned by the poller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A stateless policy mapping a consecutive-failure count to a wait duration.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Never wait.
    None,
    /// Always wait a fixed interval once `n >= 1`.
    Interval(Duration),
    /// `min(cap, base * 2^(n-1))` for `n >= 1`, zero for `n == 0`.
    CappedExponential { base: Duration, cap: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::CappedExponential {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn interval(duration: Duration) -> Self {
        BackoffPolicy::Interval(duration)
    }

    pub fn capped_exponential(base: Duration, cap: Duration) -> Self {
        BackoffPolicy::CappedExponential { base, cap }
    }

    /// Compute the wait duration for a given consecutive-failure count.
    pub fn wait_for(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        match self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Interval(d) => *d,
            BackoffPolicy::CappedExponential { base, cap } => {
                let shift = n.saturating_sub(1).min(32);
                let scaled = base.checked_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
                match scaled {
                    Some(d) if d < *cap => d,
                    _ => *cap,
                }
            }
        }
    }
}

/// Owns the consecutive-failure counter and composes it with a policy. Used
/// by the poller loop (§4.3 step 4/7): increment+sleep on transient failure,
/// reset on success.
pub struct BackoffHandler {
    policy: BackoffPolicy,
    count: AtomicU32,
}

impl BackoffHandler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            count: AtomicU32::new(0),
        }
    }

    /// Record a success: reset the counter to zero.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// Record a failure, returning the sleep duration to wait before retrying.
    pub fn record_failure(&self) -> Duration {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.policy.wait_for(n)
    }

    #[cfg(test)]
    pub(crate) fn current_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}
