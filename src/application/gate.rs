//! The consumption gate.
//!
//! Request handlers call [`RateLimitGate::check_rate_limit`] before the
//! guarded action. The gate spends one point from the caller's bucket and
//! answers allow or deny; a denial carries the retry-after duration and a
//! message ready to show to the end user.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::metrics::Metrics;
#[cfg(feature = "async")]
use crate::application::ports::AsyncBucketStore;
use crate::application::ports::{BucketKey, BucketStore, Clock, StoreError};
use crate::application::registry::PolicyTable;
use crate::domain::bucket::Consumption;
use crate::domain::message::denial_message;
use crate::domain::policy::{Policy, PolicyName};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::InMemoryBucketStore;
#[cfg(feature = "async")]
use futures_util::FutureExt;
use serde::Serialize;
use std::panic;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Decision for one guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Proceed with the action
    Allowed,
    /// Reject the action
    Denied {
        /// Time until the caller may try again
        retry_after: Duration,
        /// End-user message naming the action and the wait time
        message: String,
    },
}

impl RateLimitResult {
    /// Check if the call may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }

    /// The denial message, if denied.
    pub fn error(&self) -> Option<&str> {
        match self {
            RateLimitResult::Allowed => None,
            RateLimitResult::Denied { message, .. } => Some(message),
        }
    }

    /// Time until the caller may retry, if denied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Allowed => None,
            RateLimitResult::Denied { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Convert into the `{ allowed, error? }` shape returned to clients.
    pub fn to_response(&self) -> RateLimitResponse {
        RateLimitResponse {
            allowed: self.is_allowed(),
            error: self.error().map(str::to_owned),
        }
    }
}

/// Serializable form of a [`RateLimitResult`].
///
/// ```
/// use brokerz_throttle::RateLimitResult;
///
/// let json = serde_json::to_string(&RateLimitResult::Allowed.to_response()).unwrap();
/// assert_eq!(json, r#"{"allowed":true}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResponse {
    /// Whether the call may proceed
    pub allowed: bool,
    /// Denial message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error returned when gate configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The circuit breaker would open before any failure
    #[error("circuit breaker failure threshold must be greater than 0")]
    ZeroFailureThreshold,
    /// The circuit breaker would retry the store continuously
    #[error("circuit breaker recovery timeout must be greater than 0")]
    ZeroRecoveryTimeout,
}

/// Builder for configuring a [`RateLimitGate`].
pub struct RateLimitGateBuilder {
    policies: PolicyTable,
    clock: Option<Arc<dyn Clock>>,
    circuit_breaker: CircuitBreakerConfig,
}

impl RateLimitGateBuilder {
    /// Replace the whole policy table.
    pub fn with_policy_table(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Override the policy for a single name.
    pub fn with_policy(mut self, name: PolicyName, policy: Policy) -> Self {
        self.policies = self.policies.with_policy(name, policy);
        self
    }

    /// Set a custom clock (useful for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Configure when the gate stops calling a failing store.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Build a gate backed by process memory.
    ///
    /// # Errors
    /// Returns `BuildError` if the circuit breaker configuration is invalid.
    pub fn build(self) -> Result<RateLimitGate, BuildError> {
        self.build_with_store(Arc::new(InMemoryBucketStore::new()))
    }

    /// Build a gate backed by a custom store.
    ///
    /// # Errors
    /// Returns `BuildError` if the circuit breaker configuration is invalid.
    pub fn build_with_store<S>(self, store: S) -> Result<RateLimitGate<S>, BuildError>
    where
        S: BucketStore + Clone,
    {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }
        if self.circuit_breaker.recovery_timeout.is_zero() {
            return Err(BuildError::ZeroRecoveryTimeout);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(self.circuit_breaker, clock.clone()));

        Ok(RateLimitGate {
            store,
            policies: self.policies,
            clock,
            metrics: Metrics::new(),
            circuit_breaker,
        })
    }
}

/// Per-identity throttle for the platform's guarded actions.
///
/// The gate is an explicit context object: construct it once at startup and
/// hand clones to request handlers. Clones share buckets and metrics.
///
/// # Example
/// ```
/// use brokerz_throttle::{PolicyName, RateLimitGate};
///
/// let gate = RateLimitGate::new();
///
/// for _ in 0..10 {
///     assert!(gate.check_rate_limit(PolicyName::Login, "user@example.com", "login").is_allowed());
/// }
///
/// let denied = gate.check_rate_limit(PolicyName::Login, "user@example.com", "login");
/// assert!(denied.error().unwrap().contains("1 minuto"));
/// ```
#[derive(Clone)]
pub struct RateLimitGate<S = Arc<InMemoryBucketStore>>
where
    S: BucketStore + Clone,
{
    store: S,
    policies: PolicyTable,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl RateLimitGate {
    /// Create a gate with the production policies, in-memory buckets and
    /// the system clock.
    ///
    /// # Panics
    /// This method cannot panic because all default values are valid.
    pub fn new() -> Self {
        Self::builder()
            .build()
            .expect("default configuration is always valid")
    }

    /// Create a builder.
    pub fn builder() -> RateLimitGateBuilder {
        RateLimitGateBuilder {
            policies: PolicyTable::default(),
            clock: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RateLimitGate<S>
where
    S: BucketStore + Clone,
{
    /// Create a gate over an existing store, with default circuit breaker
    /// settings.
    pub fn with_store(store: S, policies: PolicyTable, clock: Arc<dyn Clock>) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        Self {
            store,
            policies,
            clock,
            metrics: Metrics::new(),
            circuit_breaker,
        }
    }

    /// Spend one point of `policy` for `identity` before performing `action`.
    ///
    /// `identity` is the stable actor key (email for login and forms, user id
    /// or IP address otherwise). `action` is the label used in the denial
    /// message.
    ///
    /// This blocks on the store. Inside an async runtime prefer
    /// [`check_rate_limit_async`](Self::check_rate_limit_async) (feature
    /// `async`) when the store does I/O.
    ///
    /// # Fail-Safe Behavior
    /// If the store fails or panics, or the circuit breaker is open, the call
    /// is allowed: an unavailable throttle must not lock users out.
    pub fn check_rate_limit(
        &self,
        policy: PolicyName,
        identity: &str,
        action: &str,
    ) -> RateLimitResult {
        let Some((key, now)) = self.admit(policy, identity) else {
            return RateLimitResult::Allowed;
        };
        let limits = self.policies.get(policy);

        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.store.try_consume(&key, limits, now)
        }))
        .unwrap_or_else(|_| Err(StoreError::Backend("bucket store panicked".to_string())));

        self.settle(&key, action, outcome)
    }

    /// Async form of [`check_rate_limit`](Self::check_rate_limit).
    ///
    /// Awaits the store instead of blocking, so a shared backend works on
    /// current-thread runtimes too. Decisions, messages, metrics and circuit
    /// breaker handling are identical to the synchronous call.
    #[cfg(feature = "async")]
    pub async fn check_rate_limit_async(
        &self,
        policy: PolicyName,
        identity: &str,
        action: &str,
    ) -> RateLimitResult
    where
        S: AsyncBucketStore,
    {
        let Some((key, now)) = self.admit(policy, identity) else {
            return RateLimitResult::Allowed;
        };
        let limits = *self.policies.get(policy);

        let outcome = panic::AssertUnwindSafe(self.store.try_consume_async(&key, &limits, now))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(StoreError::Backend("bucket store panicked".to_string())));

        self.settle(&key, action, outcome)
    }

    /// Normalize the identity and consult the circuit breaker.
    ///
    /// Returns `None` when the store must be skipped; the call is then
    /// already counted as allowed.
    fn admit(&self, policy: PolicyName, identity: &str) -> Option<(BucketKey, Instant)> {
        let identity = identity.trim();
        if identity.is_empty() {
            tracing::warn!(policy = %policy, "Rate limit check without identity key");
        }

        if !self.circuit_breaker.allow_request() {
            self.metrics.record_allowed();
            return None;
        }

        Some((BucketKey::new(policy, identity), self.clock.now()))
    }

    /// Turn a store outcome into a decision, recording metrics and breaker
    /// state.
    fn settle(
        &self,
        key: &BucketKey,
        action: &str,
        outcome: Result<Consumption, StoreError>,
    ) -> RateLimitResult {
        let policy = key.policy();
        let identity = key.identity();

        match outcome {
            Ok(Consumption::Allowed { remaining }) => {
                self.circuit_breaker.record_success();
                self.metrics.record_allowed();
                tracing::trace!(policy = %policy, identity, remaining, "Rate limit point spent");
                RateLimitResult::Allowed
            }
            Ok(Consumption::Rejected { retry_after }) => {
                self.circuit_breaker.record_success();
                self.metrics.record_denied();
                tracing::debug!(
                    policy = %policy,
                    identity,
                    action,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                RateLimitResult::Denied {
                    retry_after,
                    message: denial_message(action, retry_after),
                }
            }
            Err(error) => {
                self.circuit_breaker.record_failure();
                self.metrics.record_store_failure();
                self.metrics.record_allowed();
                tracing::warn!(
                    %error,
                    policy = %policy,
                    identity,
                    "Bucket store failed, allowing call"
                );
                RateLimitResult::Allowed
            }
        }
    }

    /// Forget `identity`'s bucket under `policy`, e.g. after a successful login.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be reached.
    pub fn reset(&self, policy: PolicyName, identity: &str) -> Result<(), StoreError> {
        self.store.remove(&BucketKey::new(policy, identity.trim()))
    }

    /// Drop buckets whose window and cooldown have both elapsed.
    ///
    /// Returns the number of buckets removed. Store failures are logged and
    /// count as zero.
    pub fn prune_expired(&self) -> usize {
        let policies = self.policies;
        let resolve = move |name: PolicyName| *policies.get(name);
        match self.store.prune_expired(self.clock.now(), &resolve) {
            Ok(pruned) => {
                self.metrics.record_pruned(pruned);
                pruned
            }
            Err(error) => {
                self.metrics.record_store_failure();
                tracing::warn!(%error, "Failed to prune expired buckets");
                0
            }
        }
    }

    /// Forget every bucket.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be reached.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.clear()
    }

    /// Number of tracked buckets, if the store can count cheaply.
    pub fn bucket_count(&self) -> Option<usize> {
        self.store.len()
    }

    /// The policy table in use.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::CircuitState;
    use crate::infrastructure::mocks::MockClock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn gate_with(policy: Policy) -> (RateLimitGate, MockClock) {
        let clock = MockClock::new(Instant::now());
        let gate = RateLimitGate::builder()
            .with_policy_table(PolicyTable::uniform(policy))
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        (gate, clock)
    }

    /// Store that fails on demand.
    #[derive(Debug, Clone, Default)]
    struct FlakyStore {
        inner: Arc<InMemoryBucketStore>,
        failing: Arc<AtomicBool>,
    }

    impl BucketStore for FlakyStore {
        fn try_consume(
            &self,
            key: &BucketKey,
            policy: &Policy,
            now: std::time::Instant,
        ) -> Result<Consumption, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection refused".to_string()));
            }
            self.inner.try_consume(key, policy, now)
        }

        fn remove(&self, key: &BucketKey) -> Result<(), StoreError> {
            self.inner.remove(key)
        }

        fn prune_expired(
            &self,
            now: std::time::Instant,
            policy_for: &dyn Fn(PolicyName) -> Policy,
        ) -> Result<usize, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection refused".to_string()));
            }
            self.inner.prune_expired(now, policy_for)
        }

        fn len(&self) -> Option<usize> {
            self.inner.len()
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_allows_capacity_then_denies() {
        let (gate, _) = gate_with(Policy::from_secs(3, 60, 30).unwrap());

        for _ in 0..3 {
            assert_eq!(
                gate.check_rate_limit(PolicyName::Form, "a@b.com", "enviar o formulário"),
                RateLimitResult::Allowed
            );
        }

        let denied = gate.check_rate_limit(PolicyName::Form, "a@b.com", "enviar o formulário");
        assert_eq!(
            denied,
            RateLimitResult::Denied {
                retry_after: Duration::from_secs(30),
                message: "Muitas tentativas de enviar o formulário. Aguarde 30 segundos antes de tentar novamente."
                    .to_string(),
            }
        );
        assert_eq!(gate.metrics().calls_allowed(), 3);
        assert_eq!(gate.metrics().calls_denied(), 1);
    }

    #[test]
    fn test_policies_are_separate_buckets() {
        let (gate, _) = gate_with(Policy::from_secs(1, 60, 30).unwrap());

        assert!(gate.check_rate_limit(PolicyName::Form, "u1", "x").is_allowed());
        assert!(!gate.check_rate_limit(PolicyName::Form, "u1", "x").is_allowed());
        assert!(gate.check_rate_limit(PolicyName::PropertyForm, "u1", "x").is_allowed());
        assert_eq!(gate.bucket_count(), Some(2));
    }

    #[test]
    fn test_identity_is_trimmed() {
        let (gate, _) = gate_with(Policy::from_secs(1, 60, 30).unwrap());

        assert!(gate.check_rate_limit(PolicyName::Login, "user@example.com", "login").is_allowed());
        assert!(!gate
            .check_rate_limit(PolicyName::Login, "  user@example.com ", "login")
            .is_allowed());
    }

    #[test]
    fn test_empty_identities_share_a_bucket() {
        let (gate, _) = gate_with(Policy::from_secs(1, 60, 30).unwrap());

        assert!(gate.check_rate_limit(PolicyName::AiCall, "", "usar o assistente").is_allowed());
        assert!(!gate.check_rate_limit(PolicyName::AiCall, "   ", "usar o assistente").is_allowed());
    }

    #[test]
    fn test_reset_restores_capacity() {
        let (gate, _) = gate_with(Policy::from_secs(1, 60, 30).unwrap());

        gate.check_rate_limit(PolicyName::Login, "u", "login");
        assert!(!gate.check_rate_limit(PolicyName::Login, "u", "login").is_allowed());

        gate.reset(PolicyName::Login, "u").unwrap();
        assert!(gate.check_rate_limit(PolicyName::Login, "u", "login").is_allowed());
    }

    #[test]
    fn test_prune_expired_records_metrics() {
        let (gate, clock) = gate_with(Policy::from_secs(5, 60, 30).unwrap());

        gate.check_rate_limit(PolicyName::Login, "a", "login");
        gate.check_rate_limit(PolicyName::Login, "b", "login");
        assert_eq!(gate.prune_expired(), 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(gate.prune_expired(), 2);
        assert_eq!(gate.bucket_count(), Some(0));
        assert_eq!(gate.metrics().buckets_pruned(), 2);
    }

    #[test]
    fn test_store_failure_fails_open() {
        let clock = MockClock::new(Instant::now());
        let store = FlakyStore::default();
        let gate = RateLimitGate::builder()
            .with_policy_table(PolicyTable::uniform(Policy::from_secs(1, 60, 30).unwrap()))
            .with_clock(Arc::new(clock.clone()))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(10),
            })
            .build_with_store(store.clone())
            .unwrap();

        store.failing.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            assert!(gate.check_rate_limit(PolicyName::Login, "u", "login").is_allowed());
        }

        // Three failures opened the circuit; the last two never reached the store
        assert_eq!(gate.metrics().store_failures(), 3);
        assert_eq!(gate.metrics().calls_allowed(), 5);
        assert_eq!(gate.circuit_breaker().state(), CircuitState::Open);

        // Store recovers; after the timeout the trial call closes the circuit
        store.failing.store(false, Ordering::SeqCst);
        clock.advance(Duration::from_secs(10));
        assert!(gate.check_rate_limit(PolicyName::Login, "u", "login").is_allowed());
        assert_eq!(gate.circuit_breaker().state(), CircuitState::Closed);
        assert!(!gate.check_rate_limit(PolicyName::Login, "u", "login").is_allowed());
    }

    #[test]
    fn test_prune_failure_is_counted() {
        let store = FlakyStore::default();
        let gate = RateLimitGate::builder().build_with_store(store.clone()).unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert_eq!(gate.prune_expired(), 0);
        assert_eq!(gate.metrics().store_failures(), 1);
    }

    #[test]
    fn test_invalid_circuit_breaker_config() {
        let result = RateLimitGate::builder()
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 0,
                recovery_timeout: Duration::from_secs(1),
            })
            .build();
        assert!(matches!(result, Err(BuildError::ZeroFailureThreshold)));

        let result = RateLimitGate::builder()
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::ZERO,
            })
            .build();
        assert!(matches!(result, Err(BuildError::ZeroRecoveryTimeout)));
    }

    #[test]
    fn test_response_shape() {
        let denied = RateLimitResult::Denied {
            retry_after: Duration::from_secs(45),
            message: "espere".to_string(),
        };
        assert_eq!(
            serde_json::to_value(denied.to_response()).unwrap(),
            serde_json::json!({ "allowed": false, "error": "espere" })
        );
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(45)));
        assert_eq!(RateLimitResult::Allowed.retry_after(), None);
    }

    /// Store that can only be driven asynchronously, like Redis on a
    /// current-thread runtime.
    #[cfg(feature = "async")]
    #[derive(Debug, Clone, Default)]
    struct NonBlockingStore {
        inner: Arc<InMemoryBucketStore>,
        panics: Arc<AtomicBool>,
    }

    #[cfg(feature = "async")]
    impl BucketStore for NonBlockingStore {
        fn try_consume(
            &self,
            _key: &BucketKey,
            _policy: &Policy,
            _now: std::time::Instant,
        ) -> Result<Consumption, StoreError> {
            Err(StoreError::Runtime("cannot block".to_string()))
        }

        fn remove(&self, key: &BucketKey) -> Result<(), StoreError> {
            self.inner.remove(key)
        }

        fn prune_expired(
            &self,
            now: std::time::Instant,
            policy_for: &dyn Fn(PolicyName) -> Policy,
        ) -> Result<usize, StoreError> {
            self.inner.prune_expired(now, policy_for)
        }

        fn len(&self) -> Option<usize> {
            self.inner.len()
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    #[cfg(feature = "async")]
    #[async_trait::async_trait]
    impl AsyncBucketStore for NonBlockingStore {
        async fn try_consume_async(
            &self,
            key: &BucketKey,
            policy: &Policy,
            now: std::time::Instant,
        ) -> Result<Consumption, StoreError> {
            if self.panics.load(Ordering::SeqCst) {
                panic!("store exploded");
            }
            self.inner.try_consume(key, policy, now)
        }
    }

    #[cfg(feature = "async")]
    fn non_blocking_gate() -> (RateLimitGate<NonBlockingStore>, NonBlockingStore) {
        let store = NonBlockingStore::default();
        let gate = RateLimitGate::builder()
            .with_policy_table(PolicyTable::uniform(Policy::from_secs(2, 60, 45).unwrap()))
            .with_clock(Arc::new(MockClock::new(Instant::now())))
            .build_with_store(store.clone())
            .unwrap();
        (gate, store)
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_check_on_current_thread_runtime() {
        let (gate, _) = non_blocking_gate();

        for _ in 0..2 {
            assert!(gate
                .check_rate_limit_async(PolicyName::AiCall, "user-1", "usar o assistente")
                .await
                .is_allowed());
        }
        let denied = gate
            .check_rate_limit_async(PolicyName::AiCall, "user-1", "usar o assistente")
            .await;
        assert_eq!(
            denied.error(),
            Some("Muitas tentativas de usar o assistente. Aguarde 45 segundos antes de tentar novamente.")
        );

        // More denials than the breaker threshold: the limiter stays enforced
        for _ in 0..10 {
            assert!(!gate
                .check_rate_limit_async(PolicyName::AiCall, "user-1", "usar o assistente")
                .await
                .is_allowed());
        }
        assert_eq!(gate.metrics().store_failures(), 0);
        assert_eq!(gate.metrics().calls_denied(), 11);
        assert_eq!(gate.circuit_breaker().state(), CircuitState::Closed);

        // The blocking path cannot use this store and fails open
        assert!(gate
            .check_rate_limit(PolicyName::AiCall, "user-1", "usar o assistente")
            .is_allowed());
        assert_eq!(gate.metrics().store_failures(), 1);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_check_survives_store_panic() {
        let (gate, store) = non_blocking_gate();
        store.panics.store(true, Ordering::SeqCst);

        assert!(gate
            .check_rate_limit_async(PolicyName::Login, "u", "login")
            .await
            .is_allowed());
        assert_eq!(gate.metrics().store_failures(), 1);
        assert_eq!(gate.circuit_breaker().consecutive_failures(), 1);
    }
}
