use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock used for every simulated delay.
///
/// - now(): returns a monotonic Instant
/// - sleep(): blocks the calling worker for `d` (implementations may simulate)
/// - ms_since(): elapsed milliseconds from an epoch Instant
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Real-time clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

#[cfg(any(test, feature = "test-clock"))]
pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Deterministic clock whose time only moves when someone sleeps on it.
    ///
    /// now() = origin + offset. sleep(d) advances the offset by d without
    /// blocking, so device delays cost nothing in unit tests.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            let mut off = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
            *off = off.saturating_add(d);
        }

        /// Total virtual time elapsed since construction.
        pub fn elapsed(&self) -> Duration {
            *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
