//! Coordinated control of many pumps.
//!
//! Batch operations fan out one worker per pump and return a per-pump result
//! map; a failure on one pump never affects its siblings. Sequences run step
//! by step, with every command of a step dispatched concurrently and joined
//! before the next step begins.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pumpsim_config::{Command, Sequence, Step};
use pumpsim_hardware::{Pump, PumpStatus};
use pumpsim_traits::Device;
use tracing::{debug, info, info_span, warn};

use crate::action::Action;
use crate::device::DeviceStatus;
use crate::dispatch::fan_out;
use crate::error::{Result, SimError};
use crate::simulator::HardwareSimulator;

/// Per-pump outcome of a batch operation, keyed by pump id.
pub type BatchResult<T = ()> = BTreeMap<String, Result<T>>;

/// Optional overrides applied by `set_pump_parameters`. Unset fields are left
/// alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpParameters {
    pub frequency_hz: Option<u32>,
    pub amplitude_pct: Option<f64>,
    pub mode: Option<String>,
    pub flow_rate_ml_min: Option<f64>,
}

/// Result of one command inside a sequence step.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub device: String,
    pub action: String,
    /// `Some` only for `get_status`.
    pub result: Result<Option<DeviceStatus>>,
    pub started: Instant,
    pub finished: Instant,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub index: usize,
    /// In the order the step listed its commands.
    pub outcomes: Vec<CommandOutcome>,
}

impl StepReport {
    pub fn outcome(&self, device: &str) -> Option<&CommandOutcome> {
        self.outcomes.iter().find(|o| o.device == device)
    }

    /// Earliest command start in this step.
    pub fn started(&self) -> Option<Instant> {
        self.outcomes.iter().map(|o| o.started).min()
    }

    /// Latest command completion in this step.
    pub fn finished(&self) -> Option<Instant> {
        self.outcomes.iter().map(|o| o.finished).max()
    }
}

/// Structured log of a sequence run: one report per step, in order.
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub steps: Vec<StepReport>,
}

impl SequenceReport {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcomes.iter().all(CommandOutcome::is_ok))
    }

    /// Every failed command as `(step index, outcome)`.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &CommandOutcome)> {
        self.steps
            .iter()
            .flat_map(|s| s.outcomes.iter().map(move |o| (s.index, o)))
            .filter(|(_, o)| !o.is_ok())
    }

    pub fn outcome(&self, step: usize, device: &str) -> Option<&CommandOutcome> {
        self.steps.get(step).and_then(|s| s.outcome(device))
    }
}

#[derive(Debug, Clone)]
pub struct MultiPumpController {
    sim: Arc<HardwareSimulator>,
    /// Restricts batch operations to these pumps; `None` means every pump in
    /// the registry at call time.
    pumps: Option<Vec<String>>,
}

impl MultiPumpController {
    pub fn new(sim: Arc<HardwareSimulator>) -> Self {
        Self { sim, pumps: None }
    }

    /// Control only the listed pumps. Each id must name a registered pump.
    pub fn with_pumps<I, S>(sim: Arc<HardwareSimulator>, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        for id in &ids {
            sim.get_pump(id)?;
        }
        Ok(Self {
            sim,
            pumps: Some(ids),
        })
    }

    pub fn simulator(&self) -> &Arc<HardwareSimulator> {
        &self.sim
    }

    pub fn pump_ids(&self) -> Vec<String> {
        match &self.pumps {
            Some(ids) => ids.clone(),
            None => self.sim.pump_ids(),
        }
    }

    fn controlled_pump(&self, id: &str) -> Result<Arc<Pump>> {
        match &self.pumps {
            Some(ids) if !ids.iter().any(|p| p == id) => Err(SimError::NotFound(id.to_string())),
            _ => self.sim.get_pump(id),
        }
    }

    /// Resolve each id up front, then run `op` concurrently on the resolved
    /// pumps. Lookup failures are reported in place without dispatch.
    ///
    /// The result map holds one entry per id, so an id listed more than once
    /// is not run at all and reports `DuplicateDevice`.
    fn for_each_pump<T, A, F>(
        &self,
        op_name: &str,
        targets: Vec<(String, A)>,
        op: F,
    ) -> BatchResult<T>
    where
        T: Send,
        A: Send,
        F: Fn(&Pump, A) -> Result<T> + Sync,
    {
        let mut out = BatchResult::new();
        let mut seen = HashSet::new();
        let repeated: HashSet<String> = targets
            .iter()
            .filter(|(id, _)| !seen.insert(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        let mut jobs = Vec::with_capacity(targets.len());
        for (id, arg) in targets {
            if repeated.contains(&id) {
                if !out.contains_key(&id) {
                    warn!(device = %id, op = op_name, "pump listed more than once, not run");
                    out.insert(id.clone(), Err(SimError::DuplicateDevice(id)));
                }
                continue;
            }
            match self.controlled_pump(&id) {
                Ok(pump) => jobs.push((id, pump, arg)),
                Err(e) => {
                    warn!(device = %id, op = op_name, error = %e, "pump lookup failed");
                    out.insert(id, Err(e));
                }
            }
        }

        let results = fan_out(jobs, |(id, pump, arg)| {
            let _span = info_span!("pump_op", op = op_name, device = %id).entered();
            let r = op(&pump, arg);
            if let Err(e) = &r {
                warn!(error = %e, "pump operation failed");
            }
            (id, r)
        });
        out.extend(results);
        out
    }

    /// Set each pump's flow rate and start it, all pumps concurrently.
    pub fn start_all_pumps<I, S>(&self, flow_rates: I) -> BatchResult
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let targets: Vec<(String, f64)> =
            flow_rates.into_iter().map(|(id, r)| (id.into(), r)).collect();
        info!(pumps = targets.len(), "starting pumps");
        self.for_each_pump("start", targets, |pump, rate| {
            pump.start_with(Some(rate)).map_err(SimError::from)
        })
    }

    /// Stop every controlled pump concurrently.
    pub fn stop_all_pumps(&self) -> BatchResult {
        let targets = self.pump_ids().into_iter().map(|id| (id, ())).collect();
        self.for_each_pump("stop", targets, |pump, ()| {
            pump.stop().map_err(SimError::from)
        })
    }

    pub fn set_flow_rates<I, S>(&self, flow_rates: I) -> BatchResult
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let targets = flow_rates.into_iter().map(|(id, r)| (id.into(), r)).collect();
        self.for_each_pump("set_flow_rate", targets, |pump, rate| {
            pump.set_flow_rate(rate).map_err(SimError::from)
        })
    }

    /// Apply each provided parameter in turn, stopping at the first rejected
    /// one. Parameters applied before the failure stay applied.
    pub fn set_pump_parameters(&self, id: &str, params: &PumpParameters) -> Result<()> {
        let pump = self.controlled_pump(id)?;
        if let Some(hz) = params.frequency_hz {
            pump.set_frequency(hz)?;
        }
        if let Some(pct) = params.amplitude_pct {
            pump.set_amplitude(pct)?;
        }
        if let Some(mode) = &params.mode {
            pump.set_mode(mode)?;
        }
        if let Some(rate) = params.flow_rate_ml_min {
            pump.set_flow_rate(rate)?;
        }
        debug!(device = id, ?params, "pump parameters applied");
        Ok(())
    }

    /// Dispense on several pumps at once. A pump without an entry in `rates`
    /// dispenses at its current flow rate.
    pub fn dispense_volumes<I, S>(&self, volumes: I, rates: &BTreeMap<String, f64>) -> BatchResult
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let targets = volumes
            .into_iter()
            .map(|(id, v)| {
                let id: String = id.into();
                let rate = rates.get(&id).copied();
                (id, (v, rate))
            })
            .collect();
        self.for_each_pump("dispense", targets, |pump, (volume, rate)| {
            pump.dispense(volume, rate).map_err(SimError::from)
        })
    }

    pub fn get_all_pump_statuses(&self) -> BatchResult<PumpStatus> {
        self.pump_ids()
            .into_iter()
            .map(|id| {
                let status = self.controlled_pump(&id).map(|p| p.status());
                (id, status)
            })
            .collect()
    }

    /// Run one command against any registered device.
    pub fn execute(&self, device: &str, command: &Command) -> Result<Option<DeviceStatus>> {
        let handle = self.sim.get_device(device)?;
        let action = Action::parse(device, command)?;
        action.apply(&handle)
    }

    /// Run one command against an atomizer. Other device kinds are a
    /// TypeMismatch.
    pub fn control_atomizer(&self, id: &str, command: &Command) -> Result<Option<DeviceStatus>> {
        self.sim.get_atomizer(id)?;
        self.execute(id, command)
    }

    /// Run a sequence to completion.
    ///
    /// Steps run strictly in order. Within a step every command runs on its
    /// own worker and the step ends only when all of them have finished.
    /// Failures are recorded in the report and never stop sibling commands or
    /// later steps. A device listed twice in one step runs its first command;
    /// the repeats are reported as `DuplicateDevice` without being run.
    pub fn run_synchronized_sequence(&self, sequence: &Sequence) -> SequenceReport {
        let run_start = self.sim.clock().now();
        info!(steps = sequence.len(), "sequence started");

        let steps = sequence
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| self.run_step(index, step))
            .collect::<Vec<_>>();

        let report = SequenceReport { steps };
        let failed = report.failures().count();
        info!(
            steps = report.steps.len(),
            failed,
            elapsed_ms = self.sim.clock().ms_since(run_start),
            "sequence finished"
        );
        report
    }

    fn run_step(&self, index: usize, step: &Step) -> StepReport {
        let _span = info_span!("step", index).entered();
        let clock = self.sim.clock();
        if !step.delay.is_zero() {
            clock.sleep(self.sim.timing().bounded(step.delay));
        }

        let mut seen = HashSet::new();
        let jobs: Vec<(&str, &Command, bool)> = step
            .commands
            .iter()
            .map(|(device, cmd)| (device.as_str(), cmd, seen.insert(device.as_str())))
            .collect();
        debug!(commands = jobs.len(), "dispatching step");

        let outcomes = fan_out(jobs, |(device, cmd, first)| {
            let _span = info_span!("command", device, action = %cmd.action).entered();
            let started = clock.now();
            let result = if first {
                self.execute(device, cmd)
            } else {
                Err(SimError::DuplicateDevice(device.to_string()))
            };
            let finished = clock.now();
            match &result {
                Ok(_) => debug!("command ok"),
                Err(e) => warn!(kind = ?e.kind(), error = %e, "command failed"),
            }
            CommandOutcome {
                device: device.to_string(),
                action: cmd.action.clone(),
                result,
                started,
                finished,
            }
        });

        StepReport { index, outcomes }
    }

    /// Stop every controlled pump and then every other running device.
    pub fn shutdown(&self) -> BatchResult {
        let stopped = self.stop_all_pumps();
        self.sim.shutdown();
        stopped
    }
}
