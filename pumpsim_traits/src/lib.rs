//! Shared contracts for simulated lab devices.
//!
//! Every simulated unit (pump, atomizer) implements [`Device`]. Methods take
//! `&self`: implementations own their synchronization so one handle can be
//! shared across worker threads.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::fmt;

/// Lifecycle state of a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Idle,
    Running,
    Error,
    Stopped,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Idle => "idle",
            DeviceState::Running => "running",
            DeviceState::Error => "error",
            DeviceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which concrete simulator sits behind a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Pump,
    Atomizer,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Pump => f.write_str("pump"),
            DeviceKind::Atomizer => f.write_str("atomizer"),
        }
    }
}

/// Capability contract shared by all simulated devices.
pub trait Device: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    /// Device-specific snapshot returned by [`Device::status`].
    type Status: Clone + fmt::Debug + Send;

    fn id(&self) -> &str;
    fn kind(&self) -> DeviceKind;
    fn state(&self) -> DeviceState;

    /// Idle/Stopped -> Running. Fails when already running or faulted.
    fn start(&self) -> Result<(), Self::Error>;
    /// Running -> Stopped. Never fails; clears a latched fault.
    fn stop(&self) -> Result<(), Self::Error>;
    /// Force the Error state, e.g. to exercise a caller's recovery path.
    fn inject_error(&self, message: &str);
    /// Clear any fault and return to Idle.
    fn reset(&self);
    /// Consistent snapshot of the device record.
    fn status(&self) -> Self::Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(DeviceState::Running.to_string(), "running");
        assert_eq!(DeviceState::default(), DeviceState::Idle);
        assert_eq!(DeviceKind::Atomizer.to_string(), "atomizer");
    }
}
