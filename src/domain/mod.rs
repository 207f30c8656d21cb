//! Domain layer - pure business logic with no external dependencies.
//!
//! This layer contains the core concepts and invariants of request throttling:
//! - Policies (capacity, window, cooldown)
//! - Bucket state and its cooldown state machine
//! - Denial messages shown to end users
//!
//! All types in this layer are pure and take time as an argument, so they are
//! easily testable.

pub mod bucket;
pub mod message;
pub mod policy;
