//! Manually driven clock.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Clock that only moves when told to.
///
/// Cooldowns in production policies last minutes; tests advance this clock
/// instead of sleeping. Clones share the same time.
///
/// ```
/// use brokerz_throttle::infrastructure::mocks::MockClock;
/// use brokerz_throttle::Clock;
/// use std::time::{Duration, Instant};
///
/// let clock = MockClock::new(Instant::now());
/// let handle = clock.clone();
///
/// handle.advance_secs(90);
/// assert_eq!(clock.elapsed(), Duration::from_secs(90));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a clock reading `start` until advanced.
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *offset += by;
    }

    /// Move time forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self
            .offset
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}
