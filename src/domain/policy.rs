//! Rate limiting policies for guarded actions.
//!
//! A policy is a pure configuration triple: how many points an identity may
//! spend per window, how long the window is, and how long the identity is
//! locked out once it tries to spend more.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error returned when a policy is constructed with invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Capacity must be at least one point per window
    #[error("policy capacity must be greater than 0")]
    ZeroCapacity,
    /// Window duration must be non-zero
    #[error("policy window must be greater than 0")]
    ZeroWindow,
}

/// The closed set of guarded actions.
///
/// Every name has exactly one policy in a [`PolicyTable`](crate::PolicyTable),
/// so selecting a policy by name cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    /// Login attempts, keyed by email
    Login,
    /// Generic form submissions (contact, lead capture)
    Form,
    /// Property listing create/update forms
    PropertyForm,
    /// Calls to the AI assistant
    AiCall,
}

impl PolicyName {
    /// All policy names, in declaration order.
    pub const ALL: [PolicyName; 4] = [
        PolicyName::Login,
        PolicyName::Form,
        PolicyName::PropertyForm,
        PolicyName::AiCall,
    ];

    /// Stable lowercase identifier, used in logs and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::Login => "login",
            PolicyName::Form => "form",
            PolicyName::PropertyForm => "property_form",
            PolicyName::AiCall => "ai_call",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable limiter configuration.
///
/// # Example
/// ```
/// use brokerz_throttle::Policy;
/// use std::time::Duration;
///
/// let policy = Policy::new(10, Duration::from_secs(300), Duration::from_secs(60)).unwrap();
/// assert_eq!(policy.capacity(), 10);
///
/// assert!(Policy::new(0, Duration::from_secs(60), Duration::ZERO).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyFields", into = "PolicyFields")]
pub struct Policy {
    capacity: u32,
    window: Duration,
    cooldown: Duration,
}

impl Policy {
    /// Create a new policy.
    ///
    /// # Arguments
    /// * `capacity` - Points available per window
    /// * `window` - Length of the rolling window
    /// * `cooldown` - Lockout applied once the bucket is exhausted. Zero means
    ///   no lockout: denials last until the oldest point leaves the window.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroCapacity` or `PolicyError::ZeroWindow`.
    pub fn new(capacity: u32, window: Duration, cooldown: Duration) -> Result<Self, PolicyError> {
        if capacity == 0 {
            return Err(PolicyError::ZeroCapacity);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self {
            capacity,
            window,
            cooldown,
        })
    }

    /// Build a policy from whole seconds, as policies are usually written down.
    pub fn from_secs(capacity: u32, window_secs: u64, cooldown_secs: u64) -> Result<Self, PolicyError> {
        Self::new(
            capacity,
            Duration::from_secs(window_secs),
            Duration::from_secs(cooldown_secs),
        )
    }

    /// Login attempts: 10 per 5 minutes, 1 minute lockout.
    pub const fn login() -> Self {
        Self::literal(10, 300, 60)
    }

    /// Generic form submissions: 5 per minute, 5 minute lockout.
    pub const fn form() -> Self {
        Self::literal(5, 60, 300)
    }

    /// Property listing forms: 10 per hour, 10 minute lockout.
    pub const fn property_form() -> Self {
        Self::literal(10, 3600, 600)
    }

    /// AI assistant calls: 20 per minute, 30 second lockout.
    pub const fn ai_call() -> Self {
        Self::literal(20, 60, 30)
    }

    // Only for the non-zero literals above.
    const fn literal(capacity: u32, window_secs: u64, cooldown_secs: u64) -> Self {
        Self {
            capacity,
            window: Duration::from_secs(window_secs),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    /// Points available per window.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Length of the rolling window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Lockout applied after exhaustion.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// How long bucket state for this policy can stay relevant after its
    /// last touch.
    pub fn retention(&self) -> Duration {
        self.window.max(self.cooldown)
    }
}

/// Wire shape of a policy: whole seconds, validated on the way in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PolicyFields {
    capacity: u32,
    window_secs: u64,
    cooldown_secs: u64,
}

impl TryFrom<PolicyFields> for Policy {
    type Error = PolicyError;

    fn try_from(fields: PolicyFields) -> Result<Self, Self::Error> {
        Policy::from_secs(fields.capacity, fields.window_secs, fields.cooldown_secs)
    }
}

impl From<Policy> for PolicyFields {
    fn from(policy: Policy) -> Self {
        Self {
            capacity: policy.capacity,
            window_secs: policy.window.as_secs(),
            cooldown_secs: policy.cooldown.as_secs(),
        }
    }
}
