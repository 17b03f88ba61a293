//! Simulated pump and atomizer hardware.
//!
//! Devices are plain `Send + Sync` values with interior locking: wrap them in
//! an `Arc` and drive them from as many threads as needed. All simulated time
//! goes through `pumpsim_traits::Clock`.
pub mod atomizer;
pub mod error;
mod lifecycle;
pub mod pump;
pub mod util;

pub use atomizer::{Atomizer, AtomizerStatus};
pub use error::HwError;
pub use pump::{Pump, PumpMode, PumpStatus};
pub use util::Timing;
