//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::bucket::Consumption;
use crate::domain::policy::{Policy, PolicyName};
use std::fmt::{self, Debug};
use std::time::Instant;
use thiserror::Error;

/// Identifies one bucket: a policy and the actor it throttles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    policy: PolicyName,
    identity: String,
}

impl BucketKey {
    /// Create a key for `identity` under `policy`.
    pub fn new(policy: PolicyName, identity: impl Into<String>) -> Self {
        Self {
            policy,
            identity: identity.into(),
        }
    }

    /// The policy this bucket belongs to.
    pub fn policy(&self) -> PolicyName {
        self.policy
    }

    /// The actor identity (email, user id or IP address).
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.policy, self.identity)
    }
}

/// Error raised by a bucket store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation
    #[error("bucket store backend error: {0}")]
    Backend(String),
    /// No async runtime could be obtained to drive the backend
    #[error("bucket store runtime error: {0}")]
    Runtime(String),
    /// Redis command failure
    #[cfg(feature = "redis-storage")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for bucket storage.
///
/// Stores own the check-and-record step: `try_consume` must expire old
/// points, test capacity and spend a point as one atomic operation per key.
pub trait BucketStore: Send + Sync + Debug {
    /// Atomically try to spend one point from `key`'s bucket under `policy`.
    ///
    /// The bucket is created with full capacity if it does not exist.
    ///
    /// # Errors
    /// Returns `StoreError` if the backend cannot be reached.
    fn try_consume(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError>;

    /// Forget a single bucket.
    fn remove(&self, key: &BucketKey) -> Result<(), StoreError>;

    /// Drop buckets that can no longer affect a decision.
    ///
    /// `policy_for` resolves a key's policy. Returns the number of buckets
    /// removed.
    fn prune_expired(
        &self,
        now: Instant,
        policy_for: &dyn Fn(PolicyName) -> Policy,
    ) -> Result<usize, StoreError>;

    /// Number of tracked buckets, if the backend can count cheaply.
    fn len(&self) -> Option<usize>;

    /// Forget every bucket.
    fn clear(&self) -> Result<(), StoreError>;
}

impl<T> BucketStore for std::sync::Arc<T>
where
    T: BucketStore + ?Sized,
{
    fn try_consume(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError> {
        (**self).try_consume(key, policy, now)
    }

    fn remove(&self, key: &BucketKey) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn prune_expired(
        &self,
        now: Instant,
        policy_for: &dyn Fn(PolicyName) -> Policy,
    ) -> Result<usize, StoreError> {
        (**self).prune_expired(now, policy_for)
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// Async counterpart of [`BucketStore`] for backends that do I/O.
///
/// [`RateLimitGate::check_rate_limit_async`](crate::RateLimitGate::check_rate_limit_async)
/// awaits this instead of blocking, so it works on any tokio runtime flavor.
#[cfg(feature = "async")]
#[async_trait::async_trait]
pub trait AsyncBucketStore: BucketStore {
    /// Atomically try to spend one point, without blocking the runtime.
    ///
    /// # Errors
    /// Returns `StoreError` if the backend cannot be reached.
    async fn try_consume_async(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError>;
}

#[cfg(feature = "async")]
#[async_trait::async_trait]
impl<T> AsyncBucketStore for std::sync::Arc<T>
where
    T: AsyncBucketStore + ?Sized,
{
    async fn try_consume_async(
        &self,
        key: &BucketKey,
        policy: &Policy,
        now: Instant,
    ) -> Result<Consumption, StoreError> {
        (**self).try_consume_async(key, policy, now).await
    }
}
