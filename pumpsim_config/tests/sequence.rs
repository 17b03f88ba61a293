use std::time::Duration;

use pumpsim_config::{Command, Param, Sequence, Step, load_sequence_toml};
use rstest::rstest;

#[test]
fn loads_steps_in_order_with_params() {
    let seq = load_sequence_toml(
        r#"
[[steps]]
commands = [
  { device = "P1", action = "set_frequency", frequency = 150 },
  { device = "P2", action = "start", rate = 8.0 },
]

[[steps]]
delay_ms = 120
commands = [
  { device = "P1", action = "set_mode", mode = "digital" },
  { device = "A1", action = "set_power_level", level = 75 },
]

[[steps]]
commands = [{ device = "P2", action = "stop" }]
"#,
    )
    .expect("load sequence");

    assert_eq!(seq.len(), 3);
    assert_eq!(seq.steps[0].delay, Duration::ZERO);
    assert_eq!(seq.steps[1].delay, Duration::from_millis(120));

    let (id, cmd) = &seq.steps[0].commands[1];
    assert_eq!(id, "P2");
    assert_eq!(cmd, &Command::new("start").param("rate", 8.0));

    let (_, mode) = &seq.steps[1].commands[0];
    assert_eq!(mode.params.get("mode").and_then(Param::as_str), Some("digital"));

    let (_, stop) = &seq.steps[2].commands[0];
    assert!(stop.params.is_empty());
}

#[rstest]
#[case(
    r#"
[[steps]]
commands = [
  { device = "P1", action = "set_frequency", frequency = 150 },
  { device = "P1", action = "start", rate = 5.0 },
]
"#,
    "device 'P1' is listed more than once"
)]
#[case(
    r#"
[[steps]]
commands = [{ device = "", action = "start" }]
"#,
    "must not be empty"
)]
#[case(
    r#"
[[steps]]
commands = [{ device = "P1", action = " " }]
"#,
    "empty action"
)]
#[case(
    r#"
[[steps]]
commands = [{ action = "start" }]
"#,
    "parse sequence"
)]
fn rejects_malformed_sequences(#[case] toml: &str, #[case] needle: &str) {
    let err = load_sequence_toml(toml).expect_err("should be rejected");
    assert!(format!("{err}").contains(needle), "{err}");
}

#[test]
fn builder_matches_loaded_form() {
    let built = Sequence::new().step(
        Step::new()
            .with_delay(Duration::from_millis(10))
            .command("P1", Command::new("dispense").param("volume", 2.0).param("rate", 6.0)),
    );
    let loaded = load_sequence_toml(
        r#"
[[steps]]
delay_ms = 10
commands = [{ device = "P1", action = "dispense", volume = 2.0, rate = 6.0 }]
"#,
    )
    .unwrap();
    assert_eq!(built, loaded);
}
