//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling deterministic testing of cooldowns and windows.

pub mod clock;

pub use clock::MockClock;
