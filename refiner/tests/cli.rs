//! Smoke tests for the `refiner` binary.

use std::path::Path;
use std::process::{Command, Output};

fn refiner(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_refiner"))
        .args(args)
        .current_dir(root)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run refiner")
}

#[test]
fn init_writes_config_and_refuses_to_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = refiner(temp.path(), &["init"]);
    assert!(first.status.success(), "{first:?}");
    assert!(temp.path().join(".refiner/config.toml").is_file());
    assert!(temp.path().join(".refiner/.gitignore").is_file());

    let second = refiner(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = refiner(temp.path(), &["init", "--force"]);
    assert!(forced.status.success(), "{forced:?}");
}

#[test]
fn status_on_fresh_project_reports_empty_session() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = refiner(temp.path(), &["status"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("files (0):"), "{stdout}");
    assert!(temp.path().join(".refiner/session.json").is_file());
}

#[test]
fn evaluate_without_entry_point_is_not_met() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = refiner(temp.path(), &["evaluate"]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("objective_not_met_error"), "{stdout}");
}

#[test]
fn invalid_config_exits_with_usage_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(temp.path().join(".refiner")).expect("mkdir");
    std::fs::write(
        temp.path().join(".refiner/config.toml"),
        "sandbox_dir = \"../outside\"\n",
    )
    .expect("write config");

    let output = refiner(temp.path(), &["status"]);
    assert_eq!(output.status.code(), Some(1));
}
