//! Bartels BP7 micropump behind an mp-Highdriver4 driver.
//!
//! Driver envelope: 0-14 ml/min flow, 25-800 Hz drive frequency (nominal
//! 100 Hz), 0-250 V amplitude expressed as 0-100 %, and three control modes.
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use pumpsim_traits::{Clock, Device, DeviceKind, DeviceState};
use tracing::{debug, info, warn};

use crate::error::{HwError, Result, check_range};
use crate::lifecycle::Lifecycle;
use crate::util::Timing;

pub const MAX_FLOW_ML_MIN: f64 = 14.0;
pub const MIN_FREQUENCY_HZ: u32 = 25;
pub const MAX_FREQUENCY_HZ: u32 = 800;
pub const DEFAULT_FREQUENCY_HZ: u32 = 100;
/// Peak drive voltage at 100 % amplitude.
pub const MAX_AMPLITUDE_V: f64 = 250.0;
pub const DEFAULT_VOLUME_ML: f64 = 100.0;
/// Fault latched when continuous pumping drains the reservoir.
pub const OUT_OF_LIQUID: &str = "ran out of liquid";

/// Driver control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PumpMode {
    Analog,
    Digital,
    #[default]
    Frequency,
}

impl PumpMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PumpMode::Analog => "analog",
            PumpMode::Digital => "digital",
            PumpMode::Frequency => "frequency",
        }
    }
}

impl fmt::Display for PumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pump mode '{0}', expected one of analog, digital, frequency")]
pub struct UnknownMode(pub String);

impl FromStr for PumpMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analog" => Ok(PumpMode::Analog),
            "digital" => Ok(PumpMode::Digital),
            "frequency" => Ok(PumpMode::Frequency),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Relative pumping efficiency of the driver at `hz`.
///
/// Flat between 100 and 150 Hz, falling to 0.5x at 0 Hz and at 800 Hz.
pub fn frequency_factor(hz: u32) -> f64 {
    let f = f64::from(hz);
    if f < 100.0 {
        0.5 + 0.5 * (f / 100.0)
    } else if f > 150.0 {
        1.0 - 0.5 * ((f - 150.0) / 650.0).min(1.0)
    } else {
        1.0
    }
}

/// Snapshot of a pump, taken under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpStatus {
    pub id: String,
    pub state: DeviceState,
    pub last_error: Option<String>,
    /// Commanded flow rate.
    pub flow_rate_ml_min: f64,
    /// Delivered flow: commanded rate scaled by the frequency response, 0 unless running.
    pub effective_flow_ml_min: f64,
    pub frequency_hz: u32,
    pub amplitude_pct: f64,
    pub amplitude_volts: f64,
    pub mode: PumpMode,
    pub volume_remaining_ml: f64,
    pub total_dispensed_ml: f64,
}

#[derive(Debug)]
struct PumpInner {
    life: Lifecycle,
    flow_rate_ml_min: f64,
    frequency_hz: u32,
    amplitude_pct: f64,
    mode: PumpMode,
    volume_remaining_ml: f64,
    total_dispensed_ml: f64,
    /// Start of the run segment not yet drawn from the reservoir.
    running_since: Option<Instant>,
    /// Dispenses in flight. Their volume is debited explicitly, so the run
    /// segment does not accrue while any is pending.
    dispensing: usize,
}

impl PumpInner {
    fn effective_flow(&self) -> f64 {
        self.flow_rate_ml_min * frequency_factor(self.frequency_hz)
    }

    /// Draw the open run segment up to `now` from the reservoir. A drained
    /// reservoir latches a fault.
    fn settle(&mut self, device: &str, now: Instant, uptime_ms: u64) {
        let Some(since) = self.running_since else {
            return;
        };
        self.running_since = Some(now);
        if self.dispensing > 0 {
            return;
        }
        let flow = self.effective_flow();
        let secs = now.saturating_duration_since(since).as_secs_f64();
        let ml = (flow * secs / 60.0).min(self.volume_remaining_ml);
        self.volume_remaining_ml -= ml;
        self.total_dispensed_ml += ml;
        if flow > 0.0 && self.volume_remaining_ml <= 0.0 {
            self.volume_remaining_ml = 0.0;
            self.running_since = None;
            self.life
                .fault(device, DeviceKind::Pump, OUT_OF_LIQUID, uptime_ms);
        }
    }
}

/// Simulated micropump. Shareable across threads; all state sits behind one
/// per-pump mutex that is never held across a simulated delay.
pub struct Pump {
    id: String,
    clock: Arc<dyn Clock>,
    timing: Timing,
    epoch: Instant,
    inner: Mutex<PumpInner>,
}

impl fmt::Debug for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("id", &self.id)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl Pump {
    /// Reservoir volume must be finite and non-negative.
    pub fn new(
        id: impl Into<String>,
        initial_volume_ml: f64,
        clock: Arc<dyn Clock>,
        timing: Timing,
    ) -> Result<Self> {
        let id = id.into();
        check_range(
            &id,
            "initial_volume_ml",
            initial_volume_ml,
            0.0,
            f64::MAX,
            "[0, inf) ml",
        )?;
        let epoch = clock.now();
        info!(device = %id, initial_volume_ml, "pump initialized");
        Ok(Self {
            id,
            clock,
            timing,
            epoch,
            inner: Mutex::new(PumpInner {
                life: Lifecycle::default(),
                flow_rate_ml_min: 0.0,
                frequency_hz: DEFAULT_FREQUENCY_HZ,
                amplitude_pct: 0.0,
                mode: PumpMode::default(),
                volume_remaining_ml: initial_volume_ml,
                total_dispensed_ml: 0.0,
                running_since: None,
                dispensing: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PumpInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock with the reservoir brought up to date.
    fn settled(&self) -> MutexGuard<'_, PumpInner> {
        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.settle(&self.id, now, uptime_ms);
        inner
    }

    fn uptime_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// Allowed in every state; a running pump adjusts on the fly.
    pub fn set_flow_rate(&self, rate: f64) -> Result<()> {
        check_range(&self.id, "flow_rate_ml_min", rate, 0.0, MAX_FLOW_ML_MIN, "[0, 14] ml/min")?;
        let mut inner = self.settled();
        let prev = inner.flow_rate_ml_min;
        inner.flow_rate_ml_min = rate;
        info!(
            device = %self.id,
            from = prev,
            to = rate,
            state = %inner.life.state,
            "flow rate set"
        );
        Ok(())
    }

    pub fn set_frequency(&self, hz: u32) -> Result<()> {
        check_range(
            &self.id,
            "frequency_hz",
            f64::from(hz),
            f64::from(MIN_FREQUENCY_HZ),
            f64::from(MAX_FREQUENCY_HZ),
            "[25, 800] Hz",
        )?;
        let mut inner = self.settled();
        let prev = inner.frequency_hz;
        inner.frequency_hz = hz;
        info!(
            device = %self.id,
            from = prev,
            to = hz,
            efficiency = frequency_factor(hz),
            "frequency set"
        );
        Ok(())
    }

    /// Amplitude as a percentage of the 250 V drive ceiling.
    pub fn set_amplitude(&self, pct: f64) -> Result<()> {
        check_range(&self.id, "amplitude_pct", pct, 0.0, 100.0, "[0, 100] %")?;
        let mut inner = self.lock();
        let prev = inner.amplitude_pct;
        inner.amplitude_pct = pct;
        info!(
            device = %self.id,
            from = prev,
            to = pct,
            volts = pct / 100.0 * MAX_AMPLITUDE_V,
            "amplitude set"
        );
        Ok(())
    }

    pub fn set_mode(&self, mode: &str) -> Result<()> {
        let mode = mode.parse::<PumpMode>().map_err(|e| {
            warn!(device = %self.id, mode = %e.0, "rejected pump mode");
            HwError::InvalidArgument {
                device: self.id.clone(),
                detail: e.to_string(),
            }
        })?;
        let mut inner = self.lock();
        let prev = inner.mode;
        inner.mode = mode;
        info!(device = %self.id, from = %prev, to = %mode, "mode set");
        Ok(())
    }

    /// Start the pump, optionally setting a flow rate first.
    ///
    /// The startup delay runs before the lock is taken for the final state
    /// flip, so sibling pumps start in parallel. The state is re-checked after
    /// the delay: a concurrent start or an injected fault wins.
    pub fn start_with(&self, rate: Option<f64>) -> Result<()> {
        if let Some(rate) = rate {
            self.set_flow_rate(rate)?;
        }
        self.lock().life.check_startable(&self.id)?;

        self.clock.sleep(self.timing.bounded(self.timing.pump_startup));

        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.life.check_startable(&self.id)?;
        inner
            .life
            .transition(&self.id, DeviceKind::Pump, DeviceState::Running, uptime_ms);
        inner.running_since = Some(now);
        info!(
            device = %self.id,
            flow_rate_ml_min = inner.flow_rate_ml_min,
            frequency_hz = inner.frequency_hz,
            amplitude_pct = inner.amplitude_pct,
            "pump running"
        );
        Ok(())
    }

    /// Dispense `volume_ml`, at `rate` if given or the current flow rate.
    ///
    /// A pump that was not running is started for the dispense and stopped
    /// again afterwards. The simulated pumping time is volume / rate, clamped
    /// by the timing ceiling.
    pub fn dispense(&self, volume_ml: f64, rate: Option<f64>) -> Result<()> {
        if !(volume_ml > 0.0 && volume_ml.is_finite()) {
            warn!(device = %self.id, volume_ml, "rejected dispense volume");
            return Err(HwError::Range {
                device: self.id.clone(),
                field: "volume_ml",
                value: volume_ml,
                domain: "(0, inf) ml",
            });
        }
        if let Some(rate) = rate {
            self.set_flow_rate(rate)?;
        }

        let flow = {
            let mut inner = self.settled();
            if let Some(err) = inner.life.injected_failure(&self.id) {
                return Err(err);
            }
            Self::check_volume(&self.id, &inner, volume_ml)?;
            if inner.flow_rate_ml_min <= 0.0 {
                return Err(HwError::InvalidState {
                    device: self.id.clone(),
                    op: "dispense at zero flow",
                    state: inner.life.state,
                });
            }
            inner.dispensing += 1;
            inner.flow_rate_ml_min
        };

        let started_here = match self.ensure_running() {
            Ok(started) => started,
            Err(e) => {
                self.lock().dispensing -= 1;
                return Err(e);
            }
        };

        let pumping_secs = volume_ml / flow * 60.0;
        info!(device = %self.id, volume_ml, flow, pumping_secs, "dispensing");
        self.clock.sleep(self.timing.bounded_secs(pumping_secs));

        let now = self.clock.now();
        let uptime_ms = self.uptime_ms();
        let mut inner = self.lock();
        inner.dispensing -= 1;
        // The dispensed volume stands in for the run time it overlapped.
        if inner.running_since.is_some() {
            inner.running_since = Some(now);
        }
        let outcome = Self::debit(&self.id, &mut inner, volume_ml);
        // A fault raised mid-dispense stays latched.
        if started_here && inner.life.state == DeviceState::Running {
            inner.running_since = None;
            inner.life.stop(&self.id, DeviceKind::Pump, uptime_ms);
        }
        outcome
    }

    /// Start the pump for a dispense and report whether this call started
    /// it. Losing a start race to another caller counts as already running.
    fn ensure_running(&self) -> Result<bool> {
        if self.state() == DeviceState::Running {
            return Ok(false);
        }
        match self.start_with(None) {
            Ok(()) => Ok(true),
            Err(HwError::InvalidState { .. }) if self.state() == DeviceState::Running => {
                debug!(device = %self.id, "pump started concurrently, dispensing on it");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn check_volume(device: &str, inner: &PumpInner, volume_ml: f64) -> Result<()> {
        if volume_ml > inner.volume_remaining_ml {
            warn!(
                device,
                requested_ml = volume_ml,
                available_ml = inner.volume_remaining_ml,
                "insufficient volume"
            );
            return Err(HwError::InsufficientVolume {
                device: device.to_string(),
                requested_ml: volume_ml,
                available_ml: inner.volume_remaining_ml,
            });
        }
        Ok(())
    }

    fn debit(device: &str, inner: &mut PumpInner, volume_ml: f64) -> Result<()> {
        if let Some(err) = inner.life.injected_failure(device) {
            return Err(err);
        }
        // A concurrent dispense may have drained the reservoir meanwhile.
        Self::check_volume(device, inner, volume_ml)?;
        inner.volume_remaining_ml -= volume_ml;
        inner.total_dispensed_ml += volume_ml;
        info!(
            device,
            volume_ml,
            remaining_ml = inner.volume_remaining_ml,
            "dispense complete"
        );
        Ok(())
    }

    pub fn refill(&self, volume_ml: f64) -> Result<()> {
        if !(volume_ml > 0.0 && volume_ml.is_finite()) {
            warn!(device = %self.id, volume_ml, "rejected refill volume");
            return Err(HwError::Range {
                device: self.id.clone(),
                field: "volume_ml",
                value: volume_ml,
                domain: "(0, inf) ml",
            });
        }
        let mut inner = self.settled();
        inner.volume_remaining_ml += volume_ml;
        info!(
            device = %self.id,
            volume_ml,
            remaining_ml = inner.volume_remaining_ml,
            "refilled"
        );
        Ok(())
    }
}

impl Device for Pump {
    type Error = HwError;
    type Status = PumpStatus;

    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Pump
    }

    fn state(&self) -> DeviceState {
        self.lock().life.state
    }

    fn start(&self) -> Result<()> {
        self.start_with(None)
    }

    fn stop(&self) -> Result<()> {
        let uptime_ms = self.uptime_ms();
        let mut inner = self.settled();
        inner.running_since = None;
        inner.life.stop(&self.id, DeviceKind::Pump, uptime_ms);
        Ok(())
    }

    fn inject_error(&self, message: &str) {
        let uptime_ms = self.uptime_ms();
        let mut inner = self.settled();
        inner.running_since = None;
        inner
            .life
            .fault(&self.id, DeviceKind::Pump, message, uptime_ms);
    }

    fn reset(&self) {
        let uptime_ms = self.uptime_ms();
        let mut inner = self.settled();
        inner.running_since = None;
        inner.life.reset(&self.id, DeviceKind::Pump, uptime_ms);
    }

    /// Continuous running is drawn from the reservoir up to the moment of
    /// the snapshot.
    fn status(&self) -> PumpStatus {
        let inner = self.settled();
        let running = inner.life.state == DeviceState::Running;
        PumpStatus {
            id: self.id.clone(),
            state: inner.life.state,
            last_error: inner.life.last_error.clone(),
            flow_rate_ml_min: inner.flow_rate_ml_min,
            effective_flow_ml_min: if running { inner.effective_flow() } else { 0.0 },
            frequency_hz: inner.frequency_hz,
            amplitude_pct: inner.amplitude_pct,
            amplitude_volts: inner.amplitude_pct / 100.0 * MAX_AMPLITUDE_V,
            mode: inner.mode,
            volume_remaining_ml: inner.volume_remaining_ml,
            total_dispensed_ml: inner.total_dispensed_ml,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pumpsim_traits::clock::test_clock::TestClock;
    use std::time::Duration;

    fn pump(clock: &TestClock) -> Pump {
        Pump::new("P1", 10.0, Arc::new(clock.clone()), Timing::default()).unwrap()
    }

    #[test]
    fn frequency_factor_shape() {
        assert!((frequency_factor(100) - 1.0).abs() < 1e-12);
        assert!((frequency_factor(150) - 1.0).abs() < 1e-12);
        assert!((frequency_factor(50) - 0.75).abs() < 1e-12);
        assert!((frequency_factor(800) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mode_parses_exact_names() {
        assert_eq!("digital".parse::<PumpMode>(), Ok(PumpMode::Digital));
        assert!("Digital".parse::<PumpMode>().is_err());
    }

    #[test]
    fn startup_delay_goes_through_clock() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.start_with(Some(5.0)).unwrap();
        assert_eq!(clock.elapsed(), Timing::default().pump_startup);
        assert_eq!(p.state(), DeviceState::Running);
    }

    #[test]
    fn dispense_debits_and_restores_stopped_state() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.dispense(2.0, Some(6.0)).unwrap();
        let s = p.status();
        assert_eq!(s.state, DeviceState::Stopped);
        assert!((s.volume_remaining_ml - 8.0).abs() < 1e-9);
        assert!((s.total_dispensed_ml - 2.0).abs() < 1e-9);
        // 20 s of pumping is clamped to the ceiling
        assert_eq!(
            clock.elapsed(),
            Timing::default().pump_startup + Timing::default().max_delay
        );
    }
    #[test]
    fn running_pump_draws_from_reservoir() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.start_with(Some(6.0)).unwrap();
        clock.advance(Duration::from_secs(30));
        let s = p.status();
        assert!((s.volume_remaining_ml - 7.0).abs() < 1e-9);
        assert!((s.total_dispensed_ml - 3.0).abs() < 1e-9);
        assert_eq!(s.state, DeviceState::Running);

        // Stopped pumps hold their level.
        p.stop().unwrap();
        clock.advance(Duration::from_secs(30));
        assert!((p.status().volume_remaining_ml - 7.0).abs() < 1e-9);
    }

    #[test]
    fn flow_change_settles_at_the_old_rate() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.set_frequency(50).unwrap();
        p.start_with(Some(4.0)).unwrap();
        clock.advance(Duration::from_secs(60));
        // 4 ml/min at 0.75x for one minute
        p.set_frequency(100).unwrap();
        assert!((p.status().volume_remaining_ml - 7.0).abs() < 1e-9);
    }

    #[test]
    fn drained_reservoir_latches_fault() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.start_with(Some(14.0)).unwrap();
        clock.advance(Duration::from_secs(3600));
        let s = p.status();
        assert_eq!(s.state, DeviceState::Error);
        assert_eq!(s.last_error.as_deref(), Some(OUT_OF_LIQUID));
        assert_eq!(s.volume_remaining_ml, 0.0);
        assert!((s.total_dispensed_ml - 10.0).abs() < 1e-9);
        assert!(matches!(
            p.dispense(1.0, None),
            Err(HwError::InjectedFailure { .. })
        ));
    }

    #[test]
    fn dispense_window_is_not_counted_twice() {
        let clock = TestClock::new();
        let p = pump(&clock);
        p.start_with(Some(6.0)).unwrap();
        p.dispense(1.0, None).unwrap();
        let s = p.status();
        assert_eq!(s.state, DeviceState::Running);
        assert!((s.total_dispensed_ml - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_initial_volume() {
        for v in [-1.0, f64::NAN, f64::INFINITY] {
            let err = Pump::new("P1", v, Arc::new(TestClock::new()), Timing::default()).unwrap_err();
            assert!(matches!(err, HwError::Range { field: "initial_volume_ml", .. }), "{v}");
        }
    }
}
