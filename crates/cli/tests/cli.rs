//! End-to-end smoke tests for the `dagrun` binary, driven the way
//! `assert_cmd` examples across the retrieval pack do: spawn the built
//! binary against a scratch directory, assert on its exit status and
//! stdout.

use assert_cmd::Command;
use predicates::str::contains;

const SIMPLE_DAG: &str = r#"
name: smoke
steps:
  - name: a
    command: "echo hello"
  - name: b
    depends: [a]
    command: "echo world"
"#;

const CYCLIC_DAG: &str = r#"
name: cyclic
steps:
  - name: a
    depends: [b]
    command: "echo a"
  - name: b
    depends: [a]
    command: "echo b"
"#;

fn bin() -> Command {
    Command::cargo_bin("dagrun").unwrap()
}

#[test]
fn validate_accepts_a_well_formed_dag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("smoke.yaml");
    std::fs::write(&path, SIMPLE_DAG).unwrap();

    bin().arg("validate").arg(&path).assert().success().stdout(contains("valid"));
}

#[test]
fn validate_rejects_a_cyclic_dag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cyclic.yaml");
    std::fs::write(&path, CYCLIC_DAG).unwrap();

    bin().arg("validate").arg(&path).assert().failure();
}

#[test]
fn run_executes_a_simple_dag_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("smoke.yaml");
    std::fs::write(&path, SIMPLE_DAG).unwrap();

    bin()
        .arg("run")
        .arg(&path)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--runs-dir")
        .arg(dir.path().join("runs"))
        .arg("--queue-dir")
        .arg(dir.path().join("queue"))
        .assert()
        .success()
        .stdout(contains("\"succeeded\""));
}

#[test]
fn status_reports_no_run_for_an_unknown_id() {
    let dir = tempfile::tempdir().unwrap();

    bin()
        .arg("status")
        .arg("smoke")
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--runs-dir")
        .arg(dir.path().join("runs"))
        .arg("--queue-dir")
        .arg(dir.path().join("queue"))
        .arg("--run-id")
        .arg(uuid::Uuid::new_v4().to_string())
        .assert()
        .failure();
}
