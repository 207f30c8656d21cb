//! Per-identity bucket state.
//!
//! A bucket keeps the instants of the points spent inside the current
//! rolling window. Once a consumption finds the bucket exhausted, the bucket
//! enters a cooldown; when the cooldown elapses it starts over with full
//! capacity.

use crate::domain::policy::Policy;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of trying to spend one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// The point was spent
    Allowed {
        /// Points left in the current window
        remaining: u32,
    },
    /// The bucket is exhausted or cooling down
    Rejected {
        /// Time until the next consumption can succeed
        retry_after: Duration,
    },
}

impl Consumption {
    /// Check if the point was spent.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Consumption::Allowed { .. })
    }

    /// Check if the consumption was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Consumption::Rejected { .. })
    }
}

/// Observable phase of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPhase {
    /// Points may be available
    Available,
    /// Locked out until the given instant
    CoolingDown {
        /// When the lockout ends
        until: Instant,
    },
}

/// Sliding-log bucket for one `(policy, identity)` pair.
///
/// # Example
/// ```
/// use brokerz_throttle::{BucketState, Policy};
/// use std::time::{Duration, Instant};
///
/// let policy = Policy::from_secs(2, 60, 30).unwrap();
/// let mut bucket = BucketState::new();
/// let now = Instant::now();
///
/// assert!(bucket.consume(&policy, now).is_allowed());
/// assert!(bucket.consume(&policy, now).is_allowed());
/// assert!(bucket.consume(&policy, now).is_rejected());
///
/// // Cooldown over: full capacity again
/// let later = now + Duration::from_secs(30);
/// assert!(bucket.consume(&policy, later).is_allowed());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BucketState {
    spent: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    last_touched: Option<Instant>,
    expires_at: Option<Instant>,
}

impl BucketState {
    /// Create a bucket with full capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to spend one point at `now`.
    pub fn consume(&mut self, policy: &Policy, now: Instant) -> Consumption {
        self.last_touched = Some(now);
        self.expires_at = Some(now + policy.retention());

        if let Some(until) = self.cooldown_until {
            if now < until {
                return Consumption::Rejected {
                    retry_after: until - now,
                };
            }
            self.cooldown_until = None;
            self.spent.clear();
        }

        self.expire(policy.window(), now);

        let capacity = policy.capacity() as usize;
        if self.spent.len() < capacity {
            self.spent.push_back(now);
            return Consumption::Allowed {
                remaining: (capacity - self.spent.len()) as u32,
            };
        }

        if policy.cooldown().is_zero() {
            // No lockout: wait for the oldest point to leave the window
            let retry_after = self
                .spent
                .front()
                .map(|oldest| (*oldest + policy.window()).saturating_duration_since(now))
                .unwrap_or_default();
            return Consumption::Rejected { retry_after };
        }

        self.cooldown_until = Some(now + policy.cooldown());
        Consumption::Rejected {
            retry_after: policy.cooldown(),
        }
    }

    /// Current phase as seen at `now`.
    pub fn phase(&self, now: Instant) -> BucketPhase {
        match self.cooldown_until {
            Some(until) if now < until => BucketPhase::CoolingDown { until },
            _ => BucketPhase::Available,
        }
    }

    /// Points that a consumption at `now` could still spend.
    pub fn remaining(&self, policy: &Policy, now: Instant) -> u32 {
        match self.phase(now) {
            BucketPhase::CoolingDown { .. } => 0,
            BucketPhase::Available if self.cooldown_until.is_some() => policy.capacity(),
            BucketPhase::Available => {
                let live = self
                    .spent
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) < policy.window())
                    .count() as u32;
                policy.capacity().saturating_sub(live)
            }
        }
    }

    /// Whether this bucket no longer holds any state that could affect a
    /// future consumption.
    pub fn is_idle(&self, policy: &Policy, now: Instant) -> bool {
        if matches!(self.phase(now), BucketPhase::CoolingDown { .. }) {
            return false;
        }
        match self.last_touched {
            Some(at) => now.saturating_duration_since(at) >= policy.retention(),
            None => true,
        }
    }

    /// Whether the bucket outlived the policy it was last consumed under.
    ///
    /// Unlike [`is_idle`](Self::is_idle) this needs no policy: the deadline
    /// is fixed at each consumption. An expired bucket behaves exactly like
    /// a fresh one.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now >= at)
    }

    /// Drop points that left the window.
    fn expire(&mut self, window: Duration, now: Instant) {
        while let Some(&oldest) = self.spent.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.spent.pop_front();
            } else {
                break;
            }
        }
    }
}
