use std::time::Duration;

/// Simulated timing for device commands.
///
/// Every delay a device takes is clamped to `max_delay`, so long physical
/// operations (a 20 s dispense) still finish quickly in a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pump driver spin-up before the state flips to Running.
    pub pump_startup: Duration,
    /// Transducer warm-up before the state flips to Running.
    pub atomizer_startup: Duration,
    /// Ceiling applied to every simulated wait.
    pub max_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pump_startup: Duration::from_millis(30),
            atomizer_startup: Duration::from_millis(50),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl Timing {
    /// No delays at all; handy for pure state-machine tests.
    pub fn instant() -> Self {
        Self {
            pump_startup: Duration::ZERO,
            atomizer_startup: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[inline]
    pub fn bounded(&self, d: Duration) -> Duration {
        d.min(self.max_delay)
    }

    /// Convert a physical duration in seconds into a bounded simulated wait.
    /// Negative or non-finite inputs map to zero.
    pub fn bounded_secs(&self, secs: f64) -> Duration {
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        let max = self.max_delay.as_secs_f64();
        Duration::from_secs_f64(secs.min(max))
    }
}
