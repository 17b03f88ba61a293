use pumpsim_hardware::HwError;
use pumpsim_traits::DeviceKind;
use thiserror::Error;

/// Errors surfaced by the registry, the controller and sequence commands.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error(transparent)]
    Hardware(#[from] HwError),
    #[error("device '{0}' is already registered")]
    Conflict(String),
    #[error("device '{0}' not found")]
    NotFound(String),
    #[error("device '{id}' is a {actual}, not a {expected}")]
    TypeMismatch {
        id: String,
        expected: DeviceKind,
        actual: DeviceKind,
    },
    #[error("device '{device}': unknown action '{action}'")]
    UnknownAction { device: String, action: String },
    #[error("device '{device}': {detail}")]
    InvalidArgument { device: String, detail: String },
    #[error("device '{0}' is listed more than once in this step")]
    DuplicateDevice(String),
}

/// Coarse classification of a `SimError`, for callers that branch on the
/// kind of failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Range,
    InvalidArgument,
    InvalidState,
    Conflict,
    NotFound,
    TypeMismatch,
    InjectedFailure,
    InsufficientVolume,
    DuplicateDevice,
}

impl SimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::Hardware(hw) => match hw {
                HwError::Range { .. } => ErrorKind::Range,
                HwError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
                HwError::InvalidState { .. } => ErrorKind::InvalidState,
                HwError::InjectedFailure { .. } => ErrorKind::InjectedFailure,
                HwError::InsufficientVolume { .. } => ErrorKind::InsufficientVolume,
            },
            SimError::Conflict(_) => ErrorKind::Conflict,
            SimError::NotFound(_) => ErrorKind::NotFound,
            SimError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            SimError::UnknownAction { .. } | SimError::InvalidArgument { .. } => {
                ErrorKind::InvalidArgument
            }
            SimError::DuplicateDevice(_) => ErrorKind::DuplicateDevice,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_kinds_pass_through() {
        let e: SimError = HwError::Range {
            device: "P1".into(),
            field: "frequency_hz",
            value: 900.0,
            domain: "[25, 800] Hz",
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Range);
        assert_eq!(e.to_string(), "P1: frequency_hz 900 outside [25, 800] Hz");
    }

    #[test]
    fn unknown_action_is_invalid_argument() {
        let e = SimError::UnknownAction {
            device: "P1".into(),
            action: "explode".into(),
        };
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }
}
