use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use pumpsim_core::{Command, HardwareSimulator, MultiPumpController};
use pumpsim_hardware::Timing;
use pumpsim_traits::MonotonicClock;

/// Shared in-memory sink for the JSON formatter.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

/// Run `f` with a JSON subscriber on this thread and return what it logged.
fn capture_json(f: impl FnOnce()) -> Vec<String> {
    let cap = Capture::default();
    let writer = cap.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    cap.lines()
}

fn controller() -> MultiPumpController {
    let sim = HardwareSimulator::with_clock(Arc::new(MonotonicClock::new()), Timing::instant());
    sim.add_pump("P1").unwrap();
    MultiPumpController::new(Arc::new(sim))
}

#[test]
fn transitions_carry_device_and_states() {
    let ctl = controller();
    let lines = capture_json(|| {
        ctl.execute("P1", &Command::new("start")).unwrap();
        ctl.execute("P1", &Command::new("stop")).unwrap();
    });

    let transitions: Vec<&String> = lines
        .iter()
        .filter(|l| l.contains("state transition"))
        .collect();
    assert_eq!(transitions.len(), 2, "{lines:#?}");
    assert!(transitions[0].contains(r#""device":"P1""#));
    assert!(transitions[0].contains(r#""from":"idle""#));
    assert!(transitions[0].contains(r#""to":"running""#));
    assert!(transitions[1].contains(r#""from":"running""#));
    assert!(transitions[1].contains(r#""to":"stopped""#));
}

#[test]
fn rejected_values_are_logged() {
    let ctl = controller();
    let lines = capture_json(|| {
        let _ = ctl.execute("P1", &Command::new("set_frequency").param("frequency", 900));
    });
    assert!(
        lines
            .iter()
            .any(|l| l.contains(r#""level":"WARN""#) && l.contains("frequency_hz")),
        "{lines:#?}"
    );
}

#[test]
fn injected_fault_logs_reason() {
    let ctl = controller();
    let lines = capture_json(|| {
        ctl.execute("P1", &Command::new("inject_error").param("message", "clogged"))
            .unwrap();
    });
    let fault = lines
        .iter()
        .find(|l| l.contains("fault injected"))
        .unwrap_or_else(|| panic!("no fault event in {lines:#?}"));
    assert!(fault.contains(r#""level":"ERROR""#));
    assert!(fault.contains(r#""reason":"clogged""#));
    assert!(fault.contains(r#""to":"error""#));
}
