//! 20 mm piezo disc ultrasonic atomizer.
//!
//! Rate is linear in power: 10 ml/hr at 0 % up to 30 ml/hr at 100 %. Drive
//! frequency and droplet size are reported as fixed nominal values.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use pumpsim_traits::{Clock, Device, DeviceKind, DeviceState};
use tracing::info;

use crate::error::{HwError, Result, check_range};
use crate::lifecycle::Lifecycle;
use crate::util::Timing;

pub const MIN_RATE_ML_HR: f64 = 10.0;
pub const MAX_RATE_ML_HR: f64 = 30.0;
pub const DEFAULT_POWER_PCT: f64 = 50.0;
pub const NOMINAL_FREQUENCY_KHZ: f64 = 113.0;
pub const FREQUENCY_RANGE_KHZ: (f64, f64) = (108.0, 120.0);
pub const DROPLET_SIZE_RANGE_UM: (f64, f64) = (1.0, 5.0);

/// Atomization rate for a power level in percent.
#[inline]
pub fn atomization_rate(power_pct: f64) -> f64 {
    MIN_RATE_ML_HR + (MAX_RATE_ML_HR - MIN_RATE_ML_HR) * power_pct / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomizerStatus {
    pub id: String,
    pub state: DeviceState,
    pub last_error: Option<String>,
    pub power_level_pct: f64,
    pub atomization_rate_ml_hr: f64,
    pub frequency_khz: f64,
    pub droplet_size_um: (f64, f64),
    /// Total running time, including the current run.
    pub operation_time: Duration,
    /// Estimated volume atomized, including the current run.
    pub volume_atomized_ml: f64,
}

#[derive(Debug)]
struct AtomizerInner {
    life: Lifecycle,
    power_level_pct: f64,
    rate_ml_hr: f64,
    operation_time: Duration,
    volume_atomized_ml: f64,
    running_since: Option<Instant>,
}

impl AtomizerInner {
    /// Time and volume of the open run segment up to `now`.
    fn open_segment(&self, now: Instant) -> (Duration, f64) {
        match self.running_since {
            Some(since) => {
                let d = now.saturating_duration_since(since);
                (d, self.rate_ml_hr * d.as_secs_f64() / 3600.0)
            }
            None => (Duration::ZERO, 0.0),
        }
    }

    /// Fold the open segment into the counters and restart it at `now`
    /// when `keep_running`.
    fn close_segment(&mut self, now: Instant, keep_running: bool) {
        let (d, ml) = self.open_segment(now);
        self.operation_time += d;
        self.volume_atomized_ml += ml;
        self.running_since = if keep_running && self.running_since.is_some() {
            Some(now)
        } else {
            None
        };
    }
}

pub struct Atomizer {
    id: String,
    clock: Arc<dyn Clock>,
    timing: Timing,
    epoch: Instant,
    inner: Mutex<AtomizerInner>,
}

impl fmt::Debug for Atomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atomizer")
            .field("id", &self.id)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl Atomizer {
    pub fn new(id: impl Into<String>, clock: Arc<dyn Clock>, timing: Timing) -> Self {
        let id = id.into();
        let epoch = clock.now();
        info!(device = %id, "atomizer initialized");
        Self {
            id,
            clock,
            timing,
            epoch,
            inner: Mutex::new(AtomizerInner {
                life: Lifecycle::default(),
                power_level_pct: DEFAULT_POWER_PCT,
                rate_ml_hr: atomization_rate(DEFAULT_POWER_PCT),
                operation_time: Duration::ZERO,
                volume_atomized_ml: 0.0,
                running_since: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AtomizerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uptime_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn set_power_level(&self, pct: f64) -> Result<()> {
        check_range(&self.id, "power_level_pct", pct, 0.0, 100.0, "[0, 100] %")?;
        let now = self.clock.now();
        let mut inner = self.lock();
        // Volume so far was atomized at the old rate.
        inner.close_segment(now, true);
        let prev = inner.power_level_pct;
        inner.power_level_pct = pct;
        inner.rate_ml_hr = atomization_rate(pct);
        info!(
            device = %self.id,
            from = prev,
            to = pct,
            rate_ml_hr = inner.rate_ml_hr,
            "power level set"
        );
        Ok(())
    }

    pub fn reset_counters(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.operation_time = Duration::ZERO;
        inner.volume_atomized_ml = 0.0;
        if inner.running_since.is_some() {
            inner.running_since = Some(now);
        }
        info!(device = %self.id, "counters reset");
    }
}

impl Device for Atomizer {
    type Error = HwError;
    type Status = AtomizerStatus;

    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Atomizer
    }

    fn state(&self) -> DeviceState {
        self.lock().life.state
    }

    fn start(&self) -> Result<()> {
        self.lock().life.check_startable(&self.id)?;

        self.clock
            .sleep(self.timing.bounded(self.timing.atomizer_startup));

        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.life.check_startable(&self.id)?;
        inner
            .life
            .transition(&self.id, DeviceKind::Atomizer, DeviceState::Running, uptime_ms);
        inner.running_since = Some(now);
        info!(
            device = %self.id,
            power_level_pct = inner.power_level_pct,
            frequency_khz = NOMINAL_FREQUENCY_KHZ,
            "atomizer running"
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.close_segment(now, false);
        inner.life.stop(&self.id, DeviceKind::Atomizer, uptime_ms);
        Ok(())
    }

    fn inject_error(&self, message: &str) {
        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.close_segment(now, false);
        inner
            .life
            .fault(&self.id, DeviceKind::Atomizer, message, uptime_ms);
    }

    fn reset(&self) {
        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.close_segment(now, false);
        inner.life.reset(&self.id, DeviceKind::Atomizer, uptime_ms);
    }

    fn status(&self) -> AtomizerStatus {
        let now = self.clock.now();
        let inner = self.lock();
        let (open_time, open_ml) = inner.open_segment(now);
        AtomizerStatus {
            id: self.id.clone(),
            state: inner.life.state,
            last_error: inner.life.last_error.clone(),
            power_level_pct: inner.power_level_pct,
            atomization_rate_ml_hr: inner.rate_ml_hr,
            frequency_khz: NOMINAL_FREQUENCY_KHZ,
            droplet_size_um: DROPLET_SIZE_RANGE_UM,
            operation_time: inner.operation_time + open_time,
            volume_atomized_ml: inner.volume_atomized_ml + open_ml,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pumpsim_traits::clock::test_clock::TestClock;

    #[test]
    fn rate_interpolates_between_ten_and_thirty() {
        assert!((atomization_rate(0.0) - 10.0).abs() < 1e-12);
        assert!((atomization_rate(50.0) - 20.0).abs() < 1e-12);
        assert!((atomization_rate(100.0) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn counters_accumulate_only_while_running() {
        let clock = TestClock::new();
        let a = Atomizer::new("A1", Arc::new(clock.clone()), Timing::instant());
        a.set_power_level(100.0).unwrap();
        a.start().unwrap();
        clock.advance(Duration::from_secs(360));
        a.stop().unwrap();
        clock.advance(Duration::from_secs(360));

        let s = a.status();
        assert_eq!(s.operation_time, Duration::from_secs(360));
        // 30 ml/hr for a tenth of an hour
        assert!((s.volume_atomized_ml - 3.0).abs() < 1e-9);

        a.reset_counters();
        let s = a.status();
        assert_eq!(s.operation_time, Duration::ZERO);
        assert_eq!(s.volume_atomized_ml, 0.0);
    }
}
