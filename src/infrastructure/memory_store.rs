//! In-memory bucket store.
//!
//! Buckets live in a sharded concurrent map: consumption for one key holds
//! only that key's shard lock, so unrelated actors never wait on each other.
//! State is per process. Several instances behind a load balancer each keep
//! their own buckets; use the Redis store when limits must be global.
//!
//! ## Automatic Sweeping
//!
//! Every bucket records the instant after which it can no longer affect a
//! decision. At most once per sweep interval (default 60s of clock time),
//! the consumption that notices the interval has passed drops every expired
//! bucket. The map therefore stays bounded by the actors seen within one
//! retention period, with or without the `async` sweeper.

use crate::application::ports::{BucketKey, BucketStore, StoreError};
use crate::domain::bucket::{BucketState, Consumption};
use crate::domain::policy::{Policy, PolicyName};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Default time between automatic sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Thread-safe bucket store backed by DashMap.
#[derive(Debug)]
pub struct InMemoryBucketStore {
    buckets: DashMap<BucketKey, BucketState, ahash::RandomState>,
    sweep_interval: Option<Duration>,
    /// First instant seen; sweep times are stored as nanoseconds after it
    epoch: OnceLock<Instant>,
    last_sweep_nanos: AtomicU64,
    swept: AtomicU64,
}

impl Default for InMemoryBucketStore {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl InMemoryBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with room for `capacity` buckets.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: DashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            epoch: OnceLock::new(),
            last_sweep_nanos: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Set how often consumptions sweep expired buckets.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Never sweep during consumption; only `prune_expired` removes buckets.
    pub fn without_auto_sweep(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    /// Copy of a bucket's state, if it exists.
    pub fn bucket(&self, key: &BucketKey) -> Option<BucketState> {
        self.buckets.get(key).map(|entry| entry.value().clone())
    }

    /// Check if a bucket exists.
    pub fn contains(&self, key: &BucketKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Drop every bucket whose expiry deadline has passed.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Buckets removed by automatic and explicit sweeps so far.
    pub fn swept(&self) -> u64 {
        self.swept.load(Ordering::Relaxed)
    }

    fn maybe_sweep(&self, now: Instant) {
        let Some(interval) = self.sweep_interval else {
            return;
        };
        let epoch = *self.epoch.get_or_init(|| now);
        let elapsed = as_nanos(now.saturating_duration_since(epoch));
        let last = self.last_sweep_nanos.load(Ordering::Acquire);
        if elapsed.saturating_sub(last) < as_nanos(interval) {
            return;
        }
        // Only the caller that wins the update sweeps for this interval
        if self
            .last_sweep_nanos
            .compare_exchange(last, elapsed, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let removed = self.sweep_expired(now);
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.buckets.len(),
                "Swept expired rate limit buckets"
            );
        }
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl BucketStore for InMemoryBucketStore {
    fn try_consume(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError> {
        // Must run before any shard guard is taken
        self.maybe_sweep(now);

        // Fast path avoids cloning the key for known buckets
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return Ok(bucket.consume(policy, now));
        }
        let mut bucket = self.buckets.entry(key.clone()).or_default();
        Ok(bucket.consume(policy, now))
    }

    fn remove(&self, key: &BucketKey) -> Result<(), StoreError> {
        self.buckets.remove(key);
        Ok(())
    }

    fn prune_expired(
        &self,
        now: Instant,
        policy_for: &dyn Fn(PolicyName) -> Policy,
    ) -> Result<usize, StoreError> {
        // Counted inside the closure: buckets inserted meanwhile do not skew it
        let mut pruned = 0;
        self.buckets.retain(|key, bucket| {
            let keep = !bucket.is_idle(&policy_for(key.policy()), now);
            if !keep {
                pruned += 1;
            }
            keep
        });
        Ok(pruned)
    }

    fn len(&self) -> Option<usize> {
        Some(self.buckets.len())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.buckets.clear();
        Ok(())
    }
}

#[cfg(feature = "async")]
#[async_trait::async_trait]
impl crate::application::ports::AsyncBucketStore for InMemoryBucketStore {
    async fn try_consume_async(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError> {
        // Never blocks: shard locks are held only for the update
        self.try_consume(key, policy, now)
    }
}
