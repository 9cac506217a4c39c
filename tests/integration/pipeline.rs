mod common;

use common::{compile, kairosc};
use kairos::ast::build::AstBuilder;
use kairos::ast::Module;
use kairos::span::NodeId;

/// def pulse(n): delay(0.001)
/// def main(): pulse(1); pulse(2)
fn timed_module() -> (Module, NodeId) {
    let mut b = AstBuilder::new();
    let ms = b.float(0.001);
    let wait = b.call_stmt("delay", vec![ms]);
    let pulse = b.def("pulse", &["n"], vec![wait]);
    let one = b.int(1);
    let first = b.call_stmt("pulse", vec![one]);
    let two = b.int(2);
    let second = b.call_stmt("pulse", vec![two]);
    let main = b.def("main", &[], vec![first, second]);
    let main_id = main.id;
    (b.module(vec![pulse, main]), main_id)
}

fn broken_module() -> Module {
    let mut b = AstBuilder::new();
    let brk = b.break_();
    let f = b.def("f", &[], vec![brk]);
    b.module(vec![f])
}

fn write_module(dir: &std::path::Path, module: &Module) -> std::path::PathBuf {
    let path = dir.join("module.json");
    std::fs::write(&path, serde_json::to_string(module).unwrap()).unwrap();
    path
}

#[test]
fn output_is_deterministic() {
    let (module, _) = timed_module();
    let first = serde_json::to_string(&compile(&module)).unwrap();
    let second = serde_json::to_string(&compile(&module)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn check_emits_delays() {
    let (module, main_id) = timed_module();
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), &module);

    let output = kairosc().arg("check").arg(&path).args(["--emit", "delays"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let delays: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(delays[main_id.0.to_string()], serde_json::json!({ "Const": 2_000_000 }));
}

#[test]
fn check_reads_kairos_toml_next_to_the_input() {
    let (module, main_id) = timed_module();
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), &module);
    std::fs::write(dir.path().join("kairos.toml"), "ticks_per_second = 1000\n").unwrap();

    let output = kairosc().arg("check").arg(&path).args(["--emit", "delays"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let delays: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(delays[main_id.0.to_string()], serde_json::json!({ "Const": 2 }));
}

#[test]
fn check_fails_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), &broken_module());

    let output = kairosc().arg("check").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[control-flow]"), "{stderr}");
    assert!(stderr.contains("'break' outside loop"), "{stderr}");
    assert!(stderr.contains("1 error(s)"), "{stderr}");
}

#[test]
fn check_rejects_a_bad_config() {
    let (module, _) = timed_module();
    let dir = tempfile::tempdir().unwrap();
    let path = write_module(dir.path(), &module);
    let config = dir.path().join("custom.toml");
    std::fs::write(&config, "default_int_width = 16\n").unwrap();

    let output = kairosc().arg("check").arg(&path).arg("--config").arg(&config).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("default_int_width must be 32 or 64"));
}

#[test]
fn check_reports_unreadable_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.json");
    std::fs::write(&path, "{ not json").unwrap();

    let output = kairosc().arg("check").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid AST JSON"));
}
