//! Device registry.
//!
//! `HardwareSimulator` owns the id -> device map for one simulation run. The
//! map sits behind a reader/writer lock that is only written by add/remove;
//! device state itself is guarded per device, so lookups and status reads
//! never serialize unrelated devices.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use pumpsim_config::{Config, DeviceKindCfg, TimingCfg};
use pumpsim_hardware::pump::DEFAULT_VOLUME_ML;
use pumpsim_hardware::{Atomizer, Pump, PumpStatus, Timing};
use pumpsim_traits::{Clock, DeviceKind, DeviceState, MonotonicClock};
use tracing::{debug, info};

use crate::device::{DeviceHandle, DeviceStatus};
use crate::error::{Result, SimError};

/// Aggregate snapshot of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorStatus {
    pub devices: BTreeMap<String, DeviceStatus>,
    /// Simulator uptime when the snapshot was taken.
    pub uptime_ms: u64,
}

impl SimulatorStatus {
    pub fn pumps(&self) -> impl Iterator<Item = &PumpStatus> {
        self.devices.values().filter_map(DeviceStatus::as_pump)
    }

    pub fn count_in(&self, state: DeviceState) -> usize {
        self.devices.values().filter(|s| s.state() == state).count()
    }
}

pub fn timing_from_cfg(cfg: &TimingCfg) -> Timing {
    Timing {
        pump_startup: Duration::from_millis(cfg.pump_startup_ms),
        atomizer_startup: Duration::from_millis(cfg.atomizer_startup_ms),
        max_delay: Duration::from_millis(cfg.max_delay_ms),
    }
}

pub struct HardwareSimulator {
    devices: RwLock<BTreeMap<String, DeviceHandle>>,
    clock: Arc<dyn Clock>,
    timing: Timing,
    epoch: Instant,
}

impl std::fmt::Debug for HardwareSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSimulator")
            .field("devices", &self.device_ids())
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl Default for HardwareSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareSimulator {
    /// Real-time clock with default timing.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()), Timing::default())
    }

    pub fn with_clock(clock: Arc<dyn Clock>, timing: Timing) -> Self {
        let epoch = clock.now();
        info!(?timing, "hardware simulator initialized");
        Self {
            devices: RwLock::new(BTreeMap::new()),
            clock,
            timing,
            epoch,
        }
    }

    /// Build a registry from a config, registering its devices in order.
    /// The config is expected to have passed `Config::validate`.
    pub fn from_config(cfg: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let sim = Self::with_clock(clock, timing_from_cfg(&cfg.timing));
        for dev in &cfg.devices {
            match dev.kind {
                DeviceKindCfg::Pump => {
                    sim.add_pump_with_volume(
                        &dev.id,
                        dev.initial_volume_ml.unwrap_or(DEFAULT_VOLUME_ML),
                    )?;
                }
                DeviceKindCfg::Atomizer => {
                    sim.add_atomizer(&dev.id)?;
                }
            }
        }
        Ok(sim)
    }

    /// Load, validate and build from a TOML file on a real-time clock.
    pub fn from_config_path(path: &Path) -> eyre::Result<Self> {
        let cfg = Config::from_path(path)?;
        Self::from_config(&cfg, Arc::new(MonotonicClock::new()))
            .wrap_err_with(|| format!("build simulator from {}", path.display()))
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, DeviceHandle>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, DeviceHandle>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert under the write lock; the device is only constructed once the
    /// id is known to be free.
    fn register(
        &self,
        id: &str,
        make: impl FnOnce() -> Result<DeviceHandle>,
    ) -> Result<DeviceHandle> {
        let mut devices = self.write();
        if devices.contains_key(id) {
            debug!(device = id, "registration rejected, id in use");
            return Err(SimError::Conflict(id.to_string()));
        }
        let handle = make()?;
        devices.insert(id.to_string(), handle.clone());
        info!(device = id, kind = %handle.kind(), "device registered");
        Ok(handle)
    }

    pub fn add_pump(&self, id: &str) -> Result<Arc<Pump>> {
        self.add_pump_with_volume(id, DEFAULT_VOLUME_ML)
    }

    /// Range error for a negative or non-finite volume.
    pub fn add_pump_with_volume(&self, id: &str, initial_volume_ml: f64) -> Result<Arc<Pump>> {
        let handle = self.register(id, || {
            let pump = Pump::new(id, initial_volume_ml, self.clock.clone(), self.timing)?;
            Ok(DeviceHandle::Pump(Arc::new(pump)))
        })?;
        handle.as_pump().cloned()
    }

    pub fn add_atomizer(&self, id: &str) -> Result<Arc<Atomizer>> {
        let handle = self.register(id, || {
            Ok(DeviceHandle::Atomizer(Arc::new(Atomizer::new(
                id,
                self.clock.clone(),
                self.timing,
            ))))
        })?;
        handle.as_atomizer().cloned()
    }

    pub fn get_device(&self, id: &str) -> Result<DeviceHandle> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| SimError::NotFound(id.to_string()))
    }

    pub fn get_pump(&self, id: &str) -> Result<Arc<Pump>> {
        self.get_device(id)?.as_pump().cloned()
    }

    pub fn get_atomizer(&self, id: &str) -> Result<Arc<Atomizer>> {
        self.get_device(id)?.as_atomizer().cloned()
    }

    /// Unregister a device. Handles already given out stay usable but are no
    /// longer reachable through the registry.
    pub fn remove_device(&self, id: &str) -> Result<DeviceHandle> {
        let removed = self
            .write()
            .remove(id)
            .ok_or_else(|| SimError::NotFound(id.to_string()))?;
        info!(device = id, kind = %removed.kind(), "device removed");
        Ok(removed)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn pump_ids(&self) -> Vec<String> {
        self.ids_of(DeviceKind::Pump)
    }

    pub fn atomizer_ids(&self) -> Vec<String> {
        self.ids_of(DeviceKind::Atomizer)
    }

    fn ids_of(&self, kind: DeviceKind) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, h)| h.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot every registered device.
    ///
    /// The handle list is copied under the read lock and released before any
    /// device lock is taken; each device snapshot is individually consistent.
    pub fn get_all_status(&self) -> SimulatorStatus {
        let handles: Vec<DeviceHandle> = self.read().values().cloned().collect();
        let devices = handles
            .iter()
            .map(|h| (h.id().to_string(), h.status()))
            .collect();
        SimulatorStatus {
            devices,
            uptime_ms: self.clock.ms_since(self.epoch),
        }
    }

    /// Stop every running device.
    pub fn shutdown(&self) {
        let handles: Vec<DeviceHandle> = self.read().values().cloned().collect();
        let mut stopped = 0usize;
        for h in handles.iter().filter(|h| h.state() == DeviceState::Running) {
            if h.stop().is_ok() {
                stopped += 1;
            }
        }
        info!(stopped, "all hardware devices shut down");
    }
}
