//! Paid-tier exemption hook.

/// Whether `user_id` should skip rate limiting.
///
/// Currently this is exactly `is_premium`. The gate does not call it: where
/// the exemption belongs (before or after spending a point) is still open.
///
/// ```
/// use brokerz_throttle::should_bypass_rate_limit;
///
/// assert!(should_bypass_rate_limit("u1", true));
/// assert!(!should_bypass_rate_limit("u1", false));
/// ```
pub fn should_bypass_rate_limit(_user_id: &str, is_premium: bool) -> bool {
    is_premium
}
