//! Tagged handle over the concrete device simulators.
use std::sync::Arc;

use pumpsim_hardware::{Atomizer, AtomizerStatus, Pump, PumpStatus};
use pumpsim_traits::{Device, DeviceKind, DeviceState};

use crate::error::{Result, SimError};

/// Registry entry. Cloning shares the same device.
#[derive(Debug, Clone)]
pub enum DeviceHandle {
    Pump(Arc<Pump>),
    Atomizer(Arc<Atomizer>),
}

/// Snapshot of any registered device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceStatus {
    Pump(PumpStatus),
    Atomizer(AtomizerStatus),
}

impl DeviceStatus {
    pub fn id(&self) -> &str {
        match self {
            DeviceStatus::Pump(s) => &s.id,
            DeviceStatus::Atomizer(s) => &s.id,
        }
    }

    pub fn state(&self) -> DeviceState {
        match self {
            DeviceStatus::Pump(s) => s.state,
            DeviceStatus::Atomizer(s) => s.state,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            DeviceStatus::Pump(s) => s.last_error.as_deref(),
            DeviceStatus::Atomizer(s) => s.last_error.as_deref(),
        }
    }

    pub fn as_pump(&self) -> Option<&PumpStatus> {
        match self {
            DeviceStatus::Pump(s) => Some(s),
            DeviceStatus::Atomizer(_) => None,
        }
    }

    pub fn as_atomizer(&self) -> Option<&AtomizerStatus> {
        match self {
            DeviceStatus::Atomizer(s) => Some(s),
            DeviceStatus::Pump(_) => None,
        }
    }
}

impl DeviceHandle {
    pub fn id(&self) -> &str {
        match self {
            DeviceHandle::Pump(p) => p.id(),
            DeviceHandle::Atomizer(a) => a.id(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceHandle::Pump(_) => DeviceKind::Pump,
            DeviceHandle::Atomizer(_) => DeviceKind::Atomizer,
        }
    }

    pub fn state(&self) -> DeviceState {
        match self {
            DeviceHandle::Pump(p) => p.state(),
            DeviceHandle::Atomizer(a) => a.state(),
        }
    }

    pub fn start(&self) -> Result<()> {
        match self {
            DeviceHandle::Pump(p) => p.start()?,
            DeviceHandle::Atomizer(a) => a.start()?,
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        match self {
            DeviceHandle::Pump(p) => p.stop()?,
            DeviceHandle::Atomizer(a) => a.stop()?,
        }
        Ok(())
    }

    pub fn inject_error(&self, message: &str) {
        match self {
            DeviceHandle::Pump(p) => p.inject_error(message),
            DeviceHandle::Atomizer(a) => a.inject_error(message),
        }
    }

    pub fn reset(&self) {
        match self {
            DeviceHandle::Pump(p) => p.reset(),
            DeviceHandle::Atomizer(a) => a.reset(),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        match self {
            DeviceHandle::Pump(p) => DeviceStatus::Pump(p.status()),
            DeviceHandle::Atomizer(a) => DeviceStatus::Atomizer(a.status()),
        }
    }

    pub fn as_pump(&self) -> Result<&Arc<Pump>> {
        match self {
            DeviceHandle::Pump(p) => Ok(p),
            DeviceHandle::Atomizer(_) => Err(self.mismatch(DeviceKind::Pump)),
        }
    }

    pub fn as_atomizer(&self) -> Result<&Arc<Atomizer>> {
        match self {
            DeviceHandle::Atomizer(a) => Ok(a),
            DeviceHandle::Pump(_) => Err(self.mismatch(DeviceKind::Atomizer)),
        }
    }

    fn mismatch(&self, expected: DeviceKind) -> SimError {
        SimError::TypeMismatch {
            id: self.id().to_string(),
            expected,
            actual: self.kind(),
        }
    }
}
