//! Registry of the named throttling policies.
//!
//! The registry is data, not code: a table from [`PolicyName`] to [`Policy`].
//! Production values come from `PolicyTable::default()`; tests and
//! deployments can build or deserialize their own table without touching
//! those constants.

use crate::domain::policy::{Policy, PolicyName};
use serde::{Deserialize, Serialize};

/// Declarative mapping from policy name to policy.
///
/// Every name always has an entry, so lookups cannot fail.
///
/// # Example
/// ```
/// use brokerz_throttle::{Policy, PolicyName, PolicyTable};
///
/// let table = PolicyTable::default()
///     .with_policy(PolicyName::Login, Policy::from_secs(3, 60, 10).unwrap());
///
/// assert_eq!(table.get(PolicyName::Login).capacity(), 3);
/// assert_eq!(table.get(PolicyName::AiCall).capacity(), 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyTable {
    login: Policy,
    form: Policy,
    property_form: Policy,
    ai_call: Policy,
}

impl PolicyTable {
    /// Create a table with one policy applied to every name.
    pub fn uniform(policy: Policy) -> Self {
        Self {
            login: policy,
            form: policy,
            property_form: policy,
            ai_call: policy,
        }
    }

    /// Replace the policy for `name`.
    pub fn with_policy(mut self, name: PolicyName, policy: Policy) -> Self {
        *self.slot_mut(name) = policy;
        self
    }

    /// Look up the policy for `name`.
    pub fn get(&self, name: PolicyName) -> &Policy {
        match name {
            PolicyName::Login => &self.login,
            PolicyName::Form => &self.form,
            PolicyName::PropertyForm => &self.property_form,
            PolicyName::AiCall => &self.ai_call,
        }
    }

    /// Iterate over all `(name, policy)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (PolicyName, &Policy)> + '_ {
        PolicyName::ALL.into_iter().map(move |name| (name, self.get(name)))
    }

    /// Parse a table from JSON.
    ///
    /// Names missing from the document keep their production policy.
    ///
    /// # Errors
    /// Returns `TableError` if the document is malformed or a policy is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, TableError> {
        serde_json::from_str(json).map_err(TableError::from)
    }

    fn slot_mut(&mut self, name: PolicyName) -> &mut Policy {
        match name {
            PolicyName::Login => &mut self.login,
            PolicyName::Form => &mut self.form,
            PolicyName::PropertyForm => &mut self.property_form,
            PolicyName::AiCall => &mut self.ai_call,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            login: Policy::login(),
            form: Policy::form(),
            property_form: Policy::property_form(),
            ai_call: Policy::ai_call(),
        }
    }
}

/// Error returned when a policy table cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// The document is not a valid table, or one of its policies is invalid
    #[error("invalid policy table: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_table() {
        let table = PolicyTable::default();
        assert_eq!(*table.get(PolicyName::Login), Policy::login());
        assert_eq!(*table.get(PolicyName::Form), Policy::form());
        assert_eq!(*table.get(PolicyName::PropertyForm), Policy::property_form());
        assert_eq!(*table.get(PolicyName::AiCall), Policy::ai_call());
    }

    #[test]
    fn test_with_policy_only_touches_one_name() {
        let custom = Policy::from_secs(1, 1, 1).unwrap();
        let table = PolicyTable::default().with_policy(PolicyName::Form, custom);

        assert_eq!(*table.get(PolicyName::Form), custom);
        assert_eq!(*table.get(PolicyName::Login), Policy::login());
    }

    #[test]
    fn test_uniform() {
        let policy = Policy::from_secs(2, 5, 0).unwrap();
        let table = PolicyTable::uniform(policy);
        assert!(table.iter().all(|(_, p)| *p == policy));
        assert_eq!(table.iter().count(), 4);
    }

    #[test]
    fn test_from_json_partial() {
        let table = PolicyTable::from_json_str(
            r#"{ "ai_call": { "capacity": 5, "window_secs": 10, "cooldown_secs": 2 } }"#,
        )
        .unwrap();

        let ai = table.get(PolicyName::AiCall);
        assert_eq!(ai.capacity(), 5);
        assert_eq!(ai.window(), Duration::from_secs(10));
        assert_eq!(ai.cooldown(), Duration::from_secs(2));
        assert_eq!(*table.get(PolicyName::Login), Policy::login());
    }

    #[test]
    fn test_from_json_rejects_unknown_name() {
        let result = PolicyTable::from_json_str(
            r#"{ "signup": { "capacity": 5, "window_secs": 10, "cooldown_secs": 2 } }"#,
        );
        assert!(matches!(result, Err(TableError::Parse(_))));
    }

    #[test]
    fn test_from_json_rejects_invalid_policy() {
        let result = PolicyTable::from_json_str(
            r#"{ "login": { "capacity": 5, "window_secs": 0, "cooldown_secs": 2 } }"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("window"));
    }
}
