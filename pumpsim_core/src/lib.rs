#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Simulated multi-pump rig.
//!
//! This crate wires the device simulators from `pumpsim_hardware` into an
//! owned registry and a controller that drives many devices at once.
//!
//! ## Architecture
//!
//! - **Registry**: `HardwareSimulator` maps ids to devices (`simulator` module)
//! - **Commands**: string descriptors parsed into typed actions (`action` module)
//! - **Fan-out**: one scoped worker per command, joined per step (`dispatch` module)
//! - **Control**: batch pump operations and synchronized sequences (`controller` module)
//!
//! No tracing subscriber is installed here; the embedding program owns that.

pub mod action;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod simulator;

pub use action::Action;
pub use controller::{
    BatchResult, CommandOutcome, MultiPumpController, PumpParameters, SequenceReport, StepReport,
};
pub use device::{DeviceHandle, DeviceStatus};
pub use error::{ErrorKind, Result, SimError};
pub use simulator::{HardwareSimulator, SimulatorStatus};

pub use pumpsim_config::{Command, Param, Sequence, Step};
