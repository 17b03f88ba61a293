use std::io::Write as _;
use std::sync::Arc;

use pumpsim_config::Config;
use pumpsim_core::{DeviceStatus, ErrorKind, HardwareSimulator, SimError};
use pumpsim_hardware::Timing;
use pumpsim_traits::clock::test_clock::TestClock;
use pumpsim_traits::{Device, DeviceKind, DeviceState, MonotonicClock};
use rstest::{fixture, rstest};

#[fixture]
fn sim() -> HardwareSimulator {
    let sim = HardwareSimulator::with_clock(Arc::new(TestClock::new()), Timing::default());
    sim.add_pump("P1").unwrap();
    sim.add_pump_with_volume("P2", 20.0).unwrap();
    sim.add_atomizer("A1").unwrap();
    sim
}

#[rstest]
fn duplicate_registration_is_conflict(sim: HardwareSimulator) {
    let err = sim.add_pump("P1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    // Same id across kinds is still taken.
    let err = sim.add_atomizer("P1").unwrap_err();
    assert_eq!(err, SimError::Conflict("P1".into()));
    assert_eq!(sim.len(), 3);
}

#[rstest]
fn lookups_check_kind(sim: HardwareSimulator) {
    assert_eq!(sim.get_pump("P1").unwrap().status().id, "P1");
    assert!(sim.get_atomizer("A1").is_ok());

    match sim.get_atomizer("P1").unwrap_err() {
        SimError::TypeMismatch {
            id,
            expected,
            actual,
        } => {
            assert_eq!(id, "P1");
            assert_eq!(expected, DeviceKind::Atomizer);
            assert_eq!(actual, DeviceKind::Pump);
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
    assert_eq!(sim.get_pump("A1").unwrap_err().kind(), ErrorKind::TypeMismatch);
    assert_eq!(sim.get_pump("nope").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(sim.get_device("nope").unwrap_err().kind(), ErrorKind::NotFound);
}

#[rstest]
fn ids_are_sorted_and_split_by_kind(sim: HardwareSimulator) {
    assert_eq!(sim.device_ids(), vec!["A1", "P1", "P2"]);
    assert_eq!(sim.pump_ids(), vec!["P1", "P2"]);
    assert_eq!(sim.atomizer_ids(), vec!["A1"]);
}

#[rstest]
fn remove_device_then_id_is_free(sim: HardwareSimulator) {
    let removed = sim.remove_device("P1").unwrap();
    assert_eq!(removed.kind(), DeviceKind::Pump);
    assert_eq!(sim.get_device("P1").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(sim.remove_device("P1").unwrap_err().kind(), ErrorKind::NotFound);
    sim.add_atomizer("P1").unwrap();
    assert_eq!(sim.get_device("P1").unwrap().kind(), DeviceKind::Atomizer);
}

#[rstest]
fn removed_handle_stays_usable(sim: HardwareSimulator) {
    let pump = sim.get_pump("P1").unwrap();
    sim.remove_device("P1").unwrap();
    pump.set_flow_rate(2.0).unwrap();
    assert_eq!(pump.status().flow_rate_ml_min, 2.0);
}

#[rstest]
fn all_status_covers_every_device(sim: HardwareSimulator) {
    sim.get_pump("P1").unwrap().start_with(Some(5.0)).unwrap();
    let st = sim.get_all_status();
    assert_eq!(st.devices.len(), 3);
    assert_eq!(st.count_in(DeviceState::Running), 1);
    assert_eq!(st.count_in(DeviceState::Idle), 2);
    assert_eq!(st.pumps().count(), 2);
    assert!(matches!(st.devices["A1"], DeviceStatus::Atomizer(_)));
    let p2 = st.devices["P2"].as_pump().unwrap();
    assert_eq!(p2.volume_remaining_ml, 20.0);
    // Startup of P1 advanced the virtual clock.
    assert!(st.uptime_ms >= 30);
}

#[rstest]
fn shutdown_stops_running_devices(sim: HardwareSimulator) {
    sim.get_pump("P1").unwrap().start_with(Some(1.0)).unwrap();
    sim.get_device("A1").unwrap().start().unwrap();
    sim.shutdown();
    let st = sim.get_all_status();
    assert_eq!(st.devices["P1"].state(), DeviceState::Stopped);
    assert_eq!(st.devices["A1"].state(), DeviceState::Stopped);
    assert_eq!(st.devices["P2"].state(), DeviceState::Idle);
}

#[test]
fn builds_from_config() {
    let cfg: Config = pumpsim_config::load_toml(
        r#"
[timing]
pump_startup_ms = 5
atomizer_startup_ms = 5
max_delay_ms = 50

[[devices]]
id = "P1"
kind = "pump"
initial_volume_ml = 12.5

[[devices]]
id = "A1"
kind = "atomizer"
"#,
    )
    .unwrap();
    cfg.validate().unwrap();
    let sim = HardwareSimulator::from_config(&cfg, Arc::new(MonotonicClock::new())).unwrap();
    assert_eq!(sim.timing().max_delay.as_millis(), 50);
    assert_eq!(sim.get_pump("P1").unwrap().status().volume_remaining_ml, 12.5);
    assert!(sim.get_atomizer("A1").is_ok());
}

#[test]
fn from_config_path_reports_bad_files() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"
[[devices]]
id = "P1"
kind = "pump"

[[devices]]
id = "P1"
kind = "atomizer"
"#
    )
    .unwrap();
    let err = HardwareSimulator::from_config_path(f.path()).unwrap_err();
    assert!(format!("{err:#}").contains("P1"), "{err:#}");
}

#[rstest]
#[case(-1.0)]
#[case(f64::NAN)]
#[case(f64::INFINITY)]
fn invalid_reservoir_volume_is_range_error(sim: HardwareSimulator, #[case] volume: f64) {
    let err = sim.add_pump_with_volume("P3", volume).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    // Nothing was registered under the id.
    assert_eq!(sim.get_device("P3").unwrap_err().kind(), ErrorKind::NotFound);
    assert!(sim.add_pump_with_volume("P3", 0.0).is_ok());
}
