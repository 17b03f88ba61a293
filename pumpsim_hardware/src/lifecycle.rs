//! State machine shared by every simulated device.
//!
//! Callers hold the owning device's lock while touching a `Lifecycle`; the
//! struct itself does no synchronization.
use pumpsim_traits::{DeviceKind, DeviceState};
use tracing::{debug, error, info};

use crate::error::{HwError, Result};

#[derive(Debug, Clone, Default)]
pub(crate) struct Lifecycle {
    pub state: DeviceState,
    pub last_error: Option<String>,
}

impl Lifecycle {
    /// Ok when `start` may proceed from the current state.
    pub fn check_startable(&self, device: &str) -> Result<()> {
        match self.state {
            DeviceState::Idle | DeviceState::Stopped => Ok(()),
            state => {
                debug!(device, %state, "start rejected");
                Err(HwError::InvalidState {
                    device: device.to_string(),
                    op: "start",
                    state,
                })
            }
        }
    }

    pub fn transition(
        &mut self,
        device: &str,
        kind: DeviceKind,
        to: DeviceState,
        uptime_ms: u64,
    ) {
        let from = self.state;
        self.state = to;
        info!(device, %kind, %from, %to, uptime_ms, "state transition");
    }

    /// Explicit stop: Running -> Stopped, Error -> Stopped (fault cleared).
    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self, device: &str, kind: DeviceKind, uptime_ms: u64) -> bool {
        match self.state {
            DeviceState::Running => {
                self.transition(device, kind, DeviceState::Stopped, uptime_ms);
                true
            }
            DeviceState::Error => {
                self.last_error = None;
                self.transition(device, kind, DeviceState::Stopped, uptime_ms);
                true
            }
            state @ (DeviceState::Idle | DeviceState::Stopped) => {
                info!(device, %kind, %state, uptime_ms, "stop ignored, device not running");
                false
            }
        }
    }

    pub fn fault(&mut self, device: &str, kind: DeviceKind, message: &str, uptime_ms: u64) {
        let from = self.state;
        self.state = DeviceState::Error;
        self.last_error = Some(message.to_string());
        error!(device, %kind, %from, to = %DeviceState::Error, uptime_ms, reason = message, "fault injected");
    }

    pub fn reset(&mut self, device: &str, kind: DeviceKind, uptime_ms: u64) {
        self.last_error = None;
        self.transition(device, kind, DeviceState::Idle, uptime_ms);
    }

    /// Error carried by a faulted device for commands that would move fluid.
    pub fn injected_failure(&self, device: &str) -> Option<HwError> {
        (self.state == DeviceState::Error).then(|| HwError::InjectedFailure {
            device: device.to_string(),
            message: self
                .last_error
                .clone()
                .unwrap_or_else(|| "device faulted".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_clears_fault() {
        let mut l = Lifecycle::default();
        l.fault("P1", DeviceKind::Pump, "clogged", 0);
        assert!(l.check_startable("P1").is_err());
        assert!(l.injected_failure("P1").is_some());
        assert!(l.stop("P1", DeviceKind::Pump, 1));
        assert_eq!(l.state, DeviceState::Stopped);
        assert!(l.last_error.is_none());
        assert!(l.check_startable("P1").is_ok());
    }

    #[test]
    fn stop_on_idle_is_a_noop() {
        let mut l = Lifecycle::default();
        assert!(!l.stop("P1", DeviceKind::Pump, 0));
        assert_eq!(l.state, DeviceState::Idle);
    }
}
