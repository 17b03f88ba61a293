//! Multi-device sequences.
//!
//! A `Sequence` is an ordered list of `Step`s. Each step lists at most one
//! `Command` per device id. Steps built in code keep every entry so that a
//! repeated id can be reported instead of silently dropped; the TOML loader
//! refuses such files outright.
//!
//! TOML form:
//!
//! ```toml
//! [[steps]]
//! commands = [
//!   { device = "P1", action = "set_frequency", frequency = 150 },
//!   { device = "P2", action = "start", rate = 8.0 },
//! ]
//!
//! [[steps]]
//! delay_ms = 100
//! commands = [{ device = "P2", action = "stop" }]
//! ```
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// A single command parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl Param {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Param::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Param::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Number(v)
    }
}

impl From<i64> for Param {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: i64) -> Self {
        Param::Number(v as f64)
    }
}

impl From<u32> for Param {
    fn from(v: u32) -> Self {
        Param::Number(f64::from(v))
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Number(f64::from(v))
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Flag(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

pub type Params = BTreeMap<String, Param>;

/// Command descriptor: an action verb plus its action-specific parameters.
///
/// The verb stays a string here; it is interpreted when the command runs so
/// that an unknown verb fails only its own command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    pub action: String,
    pub params: Params,
}

impl Command {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Params::new(),
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One synchronization unit of a sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// Settle time waited before the step's commands are dispatched.
    pub delay: Duration,
    pub commands: Vec<(String, Command)>,
}

impl Step {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Append a command for `device`. A repeated id is kept and flagged when
    /// the step runs.
    #[must_use]
    pub fn command(mut self, device: impl Into<String>, command: Command) -> Self {
        self.commands.push((device.into(), command));
        self
    }

    /// Device ids listed more than once, in order of their repeat.
    pub fn duplicates(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.commands
            .iter()
            .filter_map(|(id, _)| (!seen.insert(id.as_str())).then_some(id.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    pub steps: Vec<Step>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<Step> for Sequence {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SequenceToml {
    #[serde(default)]
    steps: Vec<StepToml>,
}

#[derive(Debug, Deserialize)]
struct StepToml {
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    commands: Vec<CommandToml>,
}

#[derive(Debug, Deserialize)]
struct CommandToml {
    device: String,
    action: String,
    #[serde(flatten)]
    params: Params,
}

/// Parse a sequence file. Each step's device ids must be unique.
pub fn load_sequence_toml(s: &str) -> eyre::Result<Sequence> {
    let raw: SequenceToml =
        toml::from_str(s).map_err(|e| eyre::eyre!("parse sequence: {}", e))?;

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (idx, st) in raw.steps.into_iter().enumerate() {
        let mut step = Step::new().with_delay(Duration::from_millis(st.delay_ms));
        for c in st.commands {
            if c.device.trim().is_empty() {
                eyre::bail!("steps[{idx}]: command device id must not be empty");
            }
            if c.action.trim().is_empty() {
                eyre::bail!("steps[{idx}]: command for '{}' has an empty action", c.device);
            }
            step = step.command(
                c.device,
                Command {
                    action: c.action,
                    params: c.params,
                },
            );
        }
        if let Some(dup) = step.duplicates().first() {
            eyre::bail!("steps[{idx}]: device '{dup}' is listed more than once");
        }
        steps.push(step);
    }
    Ok(Sequence { steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_reports_repeats_only() {
        let step = Step::new()
            .command("P1", Command::new("set_frequency").param("frequency", 150))
            .command("P2", Command::new("start"))
            .command("P1", Command::new("start").param("rate", 5.0));
        assert_eq!(step.duplicates(), vec!["P1"]);
    }

    #[test]
    fn integers_load_as_numbers() {
        let seq = load_sequence_toml(
            r#"
[[steps]]
commands = [{ device = "P1", action = "set_frequency", frequency = 150 }]
"#,
        )
        .unwrap();
        let (_, cmd) = &seq.steps[0].commands[0];
        assert_eq!(cmd.params.get("frequency").and_then(Param::as_f64), Some(150.0));
    }
}
