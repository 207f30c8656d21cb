//! # brokerz-throttle
//!
//! Per-identity request throttling for the iziBrokerz platform.
//!
//! Login, form submission, property-listing and AI-assistant handlers call a
//! shared [`RateLimitGate`] before doing their work. Each call spends one
//! point from the bucket of `(policy, identity)`; once a bucket is exhausted
//! the identity is locked out for the policy's cooldown and gets a message it
//! can show to the user.
//!
//! ## Quick Start
//!
//! ```rust
//! use brokerz_throttle::{PolicyName, RateLimitGate, RateLimitResult};
//!
//! // Build once at startup and hand clones to request handlers
//! let gate = RateLimitGate::new();
//!
//! match gate.check_rate_limit(PolicyName::Login, "user@example.com", "login") {
//!     RateLimitResult::Allowed => { /* check the password */ }
//!     RateLimitResult::Denied { message, .. } => {
//!         // "Muitas tentativas de login. Aguarde 1 minuto antes de tentar novamente."
//!         println!("{}", message);
//!     }
//! }
//! ```
//!
//! ## Policies
//!
//! | Policy                     | Capacity | Window | Cooldown |
//! |----------------------------|----------|--------|----------|
//! | [`PolicyName::Login`]        | 10       | 5 min  | 1 min    |
//! | [`PolicyName::Form`]         | 5        | 1 min  | 5 min    |
//! | [`PolicyName::PropertyForm`] | 10       | 1 h    | 10 min   |
//! | [`PolicyName::AiCall`]       | 20       | 1 min  | 30 s     |
//!
//! Policies are data. Override one, or load a whole table from JSON:
//!
//! ```rust
//! use brokerz_throttle::{Policy, PolicyName, PolicyTable, RateLimitGate};
//!
//! let table = PolicyTable::from_json_str(
//!     r#"{ "ai_call": { "capacity": 50, "window_secs": 60, "cooldown_secs": 10 } }"#,
//! )
//! .unwrap();
//!
//! let gate = RateLimitGate::builder()
//!     .with_policy_table(table)
//!     .with_policy(PolicyName::Form, Policy::from_secs(3, 60, 120).unwrap())
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Buckets and Cooldowns
//!
//! Buckets are sliding windows: at most `capacity` calls are allowed in any
//! `window`. The call that finds the bucket empty is denied and starts the
//! cooldown. Every call during the cooldown is denied with the remaining
//! time; when it ends the bucket starts over with full capacity.
//!
//! Wait times are shown in whole seconds below a minute and rounded up to
//! whole minutes above (see [`format_wait_time`]).
//!
//! ## Storage
//!
//! By default buckets live in process memory ([`InMemoryBucketStore`]), so
//! every instance behind a load balancer enforces its own limit. The store
//! sweeps expired buckets on its own as it is used. With the
//! `redis-storage` feature, `RedisBucketStore` shares buckets between
//! instances. Any other backend can implement [`BucketStore`].
//!
//! ## Fail-Safe Operation
//!
//! If the store fails, the gate allows the call and logs a warning. After
//! repeated failures a circuit breaker skips the store entirely until a
//! recovery timeout has passed:
//!
//! ```rust
//! # use brokerz_throttle::{CircuitState, RateLimitGate};
//! # let gate = RateLimitGate::new();
//! match gate.circuit_breaker().state() {
//!     CircuitState::Closed => println!("Normal operation"),
//!     CircuitState::Open => println!("Store unavailable - allowing all calls"),
//!     CircuitState::HalfOpen => println!("Probing the store"),
//! }
//! ```
//!
//! ## Observability
//!
//! Decisions are logged through `tracing` (denials at `debug`, store
//! failures at `warn`) and counted:
//!
//! ```rust
//! # use brokerz_throttle::RateLimitGate;
//! # let gate = RateLimitGate::new();
//! let snapshot = gate.metrics().snapshot();
//! println!("Denial rate: {:.2}%", snapshot.denial_rate() * 100.0);
//! ```
//!
//! ## Cargo Features
//!
//! - `async`: `RateLimitGate::check_rate_limit_async` and `AsyncBucketStore`
//!   for stores that do I/O, and `spawn_sweeper` to prune idle buckets on a
//!   tokio interval
//! - `redis-storage`: `RedisBucketStore` (implies `async`)
//! - `test-helpers`: exports `MockClock` for deterministic tests

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub use domain::{
    bucket::{BucketPhase, BucketState, Consumption},
    message::{denial_message, format_wait_time},
    policy::{Policy, PolicyError, PolicyName},
};

pub use application::{
    bypass::should_bypass_rate_limit,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    gate::{BuildError, RateLimitGate, RateLimitGateBuilder, RateLimitResponse, RateLimitResult},
    metrics::{Metrics, MetricsSnapshot},
    ports::{BucketKey, BucketStore, Clock, StoreError},
    registry::{PolicyTable, TableError},
};

#[cfg(feature = "async")]
pub use application::ports::AsyncBucketStore;

#[cfg(feature = "async")]
pub use application::sweeper::{spawn_sweeper, ShutdownError, SweeperConfigError, SweeperHandle};

pub use infrastructure::{clock::SystemClock, memory_store::InMemoryBucketStore};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisBucketStore, RedisStoreConfig};
