//! Integration tests for the rill binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use rill_io::read_wav;

fn rill_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rill"))
}

/// Writes a settings file that renders mono at 8 kHz on the interpreter.
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(
        &path,
        "sample_rate = 8000\nblock_size = 64\nchannels = 1\nbackend = \"interpreter\"\n",
    )
    .unwrap();
    path
}

/// control (0.25) -> outputs
fn write_dc_flow(dir: &Path) -> PathBuf {
    let path = dir.join("dc.toml");
    std::fs::write(
        &path,
        r#"
[flow]
name = "dc"

[[flow.nodes]]
text = "control"
value = 0.25

[[flow.nodes]]
text = "outputs"

[[flow.edges]]
from = 0
output_index = 0
to = 1
input_index = 0
"#,
    )
    .unwrap();
    path
}

// ---------------------------------------------------------------------------
// eval
// ---------------------------------------------------------------------------

#[test]
fn eval_uses_conventional_precedence() {
    let output = rill_bin()
        .args(["--backend", "interpreter", "eval", "$0 + $1 * 2", "3", "4"])
        .output()
        .expect("failed to run rill eval");

    assert!(output.status.success(), "rill eval failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "11");
}

#[test]
fn eval_runs_several_frames() {
    let output = rill_bin()
        .args([
            "--backend",
            "interpreter",
            "eval",
            "= $0 - 1",
            "-2",
            "--frames",
            "3",
        ])
        .output()
        .expect("failed to run rill eval");

    assert!(output.status.success(), "rill eval failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines, ["-3", "-3", "-3"]);
}

#[test]
fn eval_rejects_bad_expression() {
    let output = rill_bin()
        .args(["eval", "$0 +"])
        .output()
        .expect("failed to run rill eval");

    assert!(!output.status.success());
}

// ---------------------------------------------------------------------------
// functions
// ---------------------------------------------------------------------------

#[test]
fn functions_lists_core_library() {
    let output = rill_bin()
        .arg("functions")
        .output()
        .expect("failed to run rill functions");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available Functions"));
    for name in ["lag", "switch", "control"] {
        assert!(stdout.contains(name), "listing should contain '{name}'");
    }
}

#[test]
fn functions_json_parses() {
    let output = rill_bin()
        .args(["functions", "lag", "--json"])
        .output()
        .expect("failed to run rill functions");

    assert!(output.status.success());
    let infos: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let lag = &infos[0];
    assert_eq!(lag["name"], "lag");
    assert_eq!(lag["lag_capable"], true);
    assert_eq!(lag["inlets"][0]["type"], "float");
}

#[test]
fn functions_unknown_name_fails() {
    let output = rill_bin()
        .args(["functions", "no_such_function"])
        .output()
        .expect("failed to run rill functions");

    assert!(!output.status.success());
}

// ---------------------------------------------------------------------------
// ir
// ---------------------------------------------------------------------------

#[test]
fn ir_prints_lowered_flow() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_dc_flow(dir.path());

    let output = rill_bin()
        .arg("ir")
        .arg(&flow)
        .output()
        .expect("failed to run rill ir");

    assert!(output.status.success(), "rill ir failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("func dc("), "got:\n{stdout}");
    assert!(stdout.contains("control"));
}

#[test]
fn ir_checks_source_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("halve.rill");
    std::fs::write(
        &path,
        "func halve(x: float) -> (out: float)\nbegin\n  mul %y, $x, 0.5\n  store #out, %y\nend\n",
    )
    .unwrap();

    let output = rill_bin()
        .arg("ir")
        .arg(&path)
        .arg("--check")
        .output()
        .expect("failed to run rill ir");

    assert!(output.status.success(), "rill ir failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ok (1 definitions)"));
}

#[test]
fn library_flag_adds_functions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extra.rill");
    std::fs::write(&path, "alias hold: lag\n").unwrap();

    let output = rill_bin()
        .arg("--library")
        .arg(&path)
        .args(["functions", "hold", "--json"])
        .output()
        .expect("failed to run rill functions");

    assert!(output.status.success(), "rill functions failed: {output:?}");
    let infos: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(infos[0]["name"], "hold");
}

// ---------------------------------------------------------------------------
// render / config
// ---------------------------------------------------------------------------

#[test]
fn render_writes_wav() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let flow = write_dc_flow(dir.path());
    let out = dir.path().join("out.wav");

    let output = rill_bin()
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&flow)
        .arg("-o")
        .arg(&out)
        .args(["--seconds", "0.01"])
        .output()
        .expect("failed to run rill render");

    assert!(output.status.success(), "rill render failed: {output:?}");
    let (samples, spec) = read_wav(&out).unwrap();
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len(), 80);
    assert!(samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
}

#[test]
fn render_missing_flow_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = rill_bin()
        .arg("render")
        .arg(dir.path().join("missing.toml"))
        .arg("-o")
        .arg(dir.path().join("out.wav"))
        .output()
        .expect("failed to run rill render");

    assert!(!output.status.success());
}

#[test]
fn config_prints_effective_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = rill_bin()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .output()
        .expect("failed to run rill config");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sample_rate = 8000"));
    assert!(stdout.contains("backend = \"interpreter\""));
}

#[test]
fn config_save_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let target = dir.path().join("nested").join("saved.toml");

    let output = rill_bin()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .arg("--save")
        .arg(&target)
        .output()
        .expect("failed to run rill config");

    assert!(output.status.success(), "rill config failed: {output:?}");
    let text = std::fs::read_to_string(&target).unwrap();
    assert!(text.contains("channels = 1"));
}
