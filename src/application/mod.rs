//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Policy registry (the named policy table)
//! - Consumption gate (allow/deny decisions and denial messages)
//! - Circuit breaker and metrics around the bucket store
//! - Background sweeper for idle buckets (`async` feature)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod bypass;
pub mod circuit_breaker;
pub mod gate;
pub mod metrics;
pub mod ports;
pub mod registry;

#[cfg(feature = "async")]
pub mod sweeper;
