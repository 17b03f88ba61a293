use pumpsim_traits::DeviceState;
use thiserror::Error;

/// Failures raised by a single simulated device command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HwError {
    #[error("{device}: {field} {value} outside {domain}")]
    Range {
        device: String,
        field: &'static str,
        value: f64,
        domain: &'static str,
    },
    #[error("{device}: invalid argument: {detail}")]
    InvalidArgument { device: String, detail: String },
    #[error("{device}: cannot {op} while {state}")]
    InvalidState {
        device: String,
        op: &'static str,
        state: DeviceState,
    },
    #[error("{device}: injected failure: {message}")]
    InjectedFailure { device: String, message: String },
    #[error("{device}: requested {requested_ml} ml but only {available_ml} ml remaining")]
    InsufficientVolume {
        device: String,
        requested_ml: f64,
        available_ml: f64,
    },
}

impl HwError {
    /// Id of the device that raised the error.
    pub fn device(&self) -> &str {
        match self {
            HwError::Range { device, .. }
            | HwError::InvalidArgument { device, .. }
            | HwError::InvalidState { device, .. }
            | HwError::InjectedFailure { device, .. }
            | HwError::InsufficientVolume { device, .. } => device,
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;

/// Reject `value` unless it lies in the closed interval `[min, max]`.
///
/// NaN never passes. The rejection is logged with the device id so failed
/// commands show up next to state transitions.
pub(crate) fn check_range(
    device: &str,
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    domain: &'static str,
) -> Result<()> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    tracing::warn!(device, field, value, domain, "rejected out-of-range value");
    Err(HwError::Range {
        device: device.to_string(),
        field,
        value,
        domain,
    })
}
