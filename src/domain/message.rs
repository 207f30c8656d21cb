//! Human-readable denial messages.
//!
//! End users of the platform read these, so they are written in Portuguese.

use std::time::Duration;

/// Render a retry-after duration as whole minutes or seconds.
///
/// Seconds are rounded up first; durations of a minute or more are then
/// rounded up to whole minutes.
///
/// # Example
/// ```
/// use brokerz_throttle::format_wait_time;
/// use std::time::Duration;
///
/// assert_eq!(format_wait_time(Duration::from_millis(90_000)), "2 minutos");
/// assert_eq!(format_wait_time(Duration::from_millis(45_000)), "45 segundos");
/// assert_eq!(format_wait_time(Duration::from_secs(60)), "1 minuto");
/// ```
pub fn format_wait_time(retry_after: Duration) -> String {
    let millis = retry_after.as_millis();
    let secs = millis.div_ceil(1000).max(1);

    if secs >= 60 {
        let minutes = secs.div_ceil(60);
        format!("{} {}", minutes, if minutes == 1 { "minuto" } else { "minutos" })
    } else {
        format!("{} {}", secs, if secs == 1 { "segundo" } else { "segundos" })
    }
}

/// Full denial message for a guarded action.
///
/// `action` is the caller-supplied label, e.g. `"login"`.
pub fn denial_message(action: &str, retry_after: Duration) -> String {
    format!(
        "Muitas tentativas de {}. Aguarde {} antes de tentar novamente.",
        action,
        format_wait_time(retry_after)
    )
}
