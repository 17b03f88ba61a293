#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the hardware simulator.
//!
//! - `Config` describes simulated timing and the initial device set. It is
//!   deserialized from TOML and checked with `Config::validate`.
//! - `sequence` holds the multi-device choreography model and its TOML
//!   loader, which rejects a device listed twice in one step.
pub mod sequence;

pub use sequence::{Command, Param, Params, Sequence, Step, load_sequence_toml};

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Largest simulated wait a config may ask for.
pub const MAX_DELAY_CEILING_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKindCfg {
    Pump,
    Atomizer,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceCfg {
    pub id: String,
    pub kind: DeviceKindCfg,
    /// Reservoir volume for pumps (ml). Defaults to 100 ml.
    #[serde(default)]
    pub initial_volume_ml: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TimingCfg {
    pub pump_startup_ms: u64,
    pub atomizer_startup_ms: u64,
    /// Ceiling applied to every simulated wait (startup, dispense, step delay)
    pub max_delay_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            pump_startup_ms: 30,
            atomizer_startup_ms: 50,
            max_delay_ms: 250,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingCfg,
    /// Devices registered at construction, in order.
    #[serde(default)]
    pub devices: Vec<DeviceCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn from_path(path: &Path) -> eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
        let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Timing
        if self.timing.max_delay_ms > MAX_DELAY_CEILING_MS {
            eyre::bail!("timing.max_delay_ms is unreasonably large (>{MAX_DELAY_CEILING_MS}ms)");
        }
        if self.timing.pump_startup_ms > self.timing.max_delay_ms {
            eyre::bail!("timing.pump_startup_ms must be <= timing.max_delay_ms");
        }
        if self.timing.atomizer_startup_ms > self.timing.max_delay_ms {
            eyre::bail!("timing.atomizer_startup_ms must be <= timing.max_delay_ms");
        }

        // Devices
        let mut seen = HashSet::new();
        for (idx, dev) in self.devices.iter().enumerate() {
            if dev.id.trim().is_empty() {
                eyre::bail!("devices[{idx}].id must not be empty");
            }
            if !seen.insert(dev.id.as_str()) {
                eyre::bail!("devices[{idx}].id '{}' is declared more than once", dev.id);
            }
            match (dev.kind, dev.initial_volume_ml) {
                (DeviceKindCfg::Pump, Some(v)) if !(v.is_finite() && v >= 0.0) => {
                    eyre::bail!("devices[{idx}].initial_volume_ml must be >= 0");
                }
                (DeviceKindCfg::Atomizer, Some(_)) => {
                    eyre::bail!("devices[{idx}].initial_volume_ml only applies to pumps");
                }
                _ => {}
            }
        }

        Ok(())
    }
}
