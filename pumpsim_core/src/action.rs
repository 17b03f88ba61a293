//! Command descriptors resolved into typed device actions.
use pumpsim_config::{Command, Param};
use pumpsim_hardware::HwError;

use crate::device::{DeviceHandle, DeviceStatus};
use crate::error::{Result, SimError};

const DEFAULT_FAULT_MESSAGE: &str = "injected fault";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Start { rate: Option<f64> },
    Stop,
    SetFlowRate(f64),
    SetFrequency(u32),
    SetAmplitude(f64),
    SetMode(String),
    SetPowerLevel(f64),
    InjectError(String),
    Reset,
    GetStatus,
    Dispense { volume: f64, rate: Option<f64> },
    Refill(f64),
    ResetCounters,
}

impl Action {
    /// Interpret a command descriptor addressed to `device`.
    ///
    /// Unknown verbs, missing parameters and parameters of the wrong type
    /// are InvalidArgument. Numeric range checks are left to the device.
    pub fn parse(device: &str, cmd: &Command) -> Result<Self> {
        let args = Args { device, cmd };
        let action = match cmd.action.as_str() {
            "start" => Action::Start {
                rate: args.opt_number("rate")?,
            },
            "stop" => Action::Stop,
            "set_flow_rate" | "set_flow" => Action::SetFlowRate(args.number("rate")?),
            "set_frequency" => Action::SetFrequency(args.frequency("frequency")?),
            "set_amplitude" => Action::SetAmplitude(args.number("amplitude")?),
            "set_mode" => Action::SetMode(args.text("mode")?),
            "set_power_level" | "set_power" => Action::SetPowerLevel(args.number("level")?),
            "inject_error" => Action::InjectError(
                args.opt_text("message")?
                    .unwrap_or_else(|| DEFAULT_FAULT_MESSAGE.to_string()),
            ),
            "reset" => Action::Reset,
            "get_status" => Action::GetStatus,
            "dispense" => Action::Dispense {
                volume: args.number("volume")?,
                rate: args.opt_number("rate")?,
            },
            "refill" => Action::Refill(args.number("volume")?),
            "reset_counters" => Action::ResetCounters,
            other => {
                tracing::warn!(device, action = other, "unknown action");
                return Err(SimError::UnknownAction {
                    device: device.to_string(),
                    action: other.to_string(),
                });
            }
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Start { .. } => "start",
            Action::Stop => "stop",
            Action::SetFlowRate(_) => "set_flow_rate",
            Action::SetFrequency(_) => "set_frequency",
            Action::SetAmplitude(_) => "set_amplitude",
            Action::SetMode(_) => "set_mode",
            Action::SetPowerLevel(_) => "set_power_level",
            Action::InjectError(_) => "inject_error",
            Action::Reset => "reset",
            Action::GetStatus => "get_status",
            Action::Dispense { .. } => "dispense",
            Action::Refill(_) => "refill",
            Action::ResetCounters => "reset_counters",
        }
    }

    /// Run against a device. `GetStatus` yields the snapshot; other actions
    /// yield `None`.
    pub fn apply(&self, device: &DeviceHandle) -> Result<Option<DeviceStatus>> {
        match self {
            Action::Start { rate: None } => device.start()?,
            Action::Start { rate: Some(rate) } => device.as_pump()?.start_with(Some(*rate))?,
            Action::Stop => device.stop()?,
            Action::SetFlowRate(rate) => device.as_pump()?.set_flow_rate(*rate)?,
            Action::SetFrequency(hz) => device.as_pump()?.set_frequency(*hz)?,
            Action::SetAmplitude(pct) => device.as_pump()?.set_amplitude(*pct)?,
            Action::SetMode(mode) => device.as_pump()?.set_mode(mode)?,
            Action::SetPowerLevel(pct) => device.as_atomizer()?.set_power_level(*pct)?,
            Action::InjectError(message) => device.inject_error(message),
            Action::Reset => device.reset(),
            Action::GetStatus => return Ok(Some(device.status())),
            Action::Dispense { volume, rate } => device.as_pump()?.dispense(*volume, *rate)?,
            Action::Refill(volume) => device.as_pump()?.refill(*volume)?,
            Action::ResetCounters => device.as_atomizer()?.reset_counters(),
        }
        Ok(None)
    }
}

struct Args<'a> {
    device: &'a str,
    cmd: &'a Command,
}

impl Args<'_> {
    fn invalid(&self, detail: String) -> SimError {
        tracing::warn!(device = self.device, action = %self.cmd.action, %detail, "bad command parameters");
        SimError::InvalidArgument {
            device: self.device.to_string(),
            detail,
        }
    }

    fn get(&self, key: &str) -> Option<&Param> {
        self.cmd.params.get(key)
    }

    fn opt_number(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(p) => p.as_f64().map(Some).ok_or_else(|| {
                self.invalid(format!("parameter '{key}' of '{}' must be a number", self.cmd.action))
            }),
        }
    }

    fn number(&self, key: &str) -> Result<f64> {
        self.opt_number(key)?.ok_or_else(|| {
            self.invalid(format!("'{}' requires parameter '{key}'", self.cmd.action))
        })
    }

    fn opt_text(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(p) => p.as_str().map(|s| Some(s.to_string())).ok_or_else(|| {
                self.invalid(format!("parameter '{key}' of '{}' must be a string", self.cmd.action))
            }),
        }
    }

    fn text(&self, key: &str) -> Result<String> {
        self.opt_text(key)?.ok_or_else(|| {
            self.invalid(format!("'{}' requires parameter '{key}'", self.cmd.action))
        })
    }

    /// Whole number of hertz. Values that do not fit a `u32` are reported as
    /// out of the driver's range.
    fn frequency(&self, key: &str) -> Result<u32> {
        let hz = self.number(key)?;
        if hz.fract() != 0.0 || !hz.is_finite() {
            return Err(self.invalid(format!("parameter '{key}' must be a whole number, got {hz}")));
        }
        if hz < 0.0 || hz > f64::from(u32::MAX) {
            return Err(HwError::Range {
                device: self.device.to_string(),
                field: "frequency_hz",
                value: hz,
                domain: "[25, 800] Hz",
            }
            .into());
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(hz as u32)
    }
}
