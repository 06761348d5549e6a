use assert_cmd::cargo::cargo_bin_cmd;

mod common;

use common::{parse_json, prepare_fixture};

#[test]
fn configuration_errors_exit_with_user_error() {
    let (tmp, project) = prepare_fixture("demo-bad-version");
    let assert = cargo_bin_cmd!("pdmb")
        .arg("--project")
        .arg(&project)
        .args(["--json", "build", "wheel", "--out-dir"])
        .arg(tmp.path().join("dist"))
        .assert()
        .failure()
        .code(1);

    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["kind"], "config");
    assert!(payload["message"]
        .as_str()
        .unwrap_or_default()
        .contains("tool.pdm.version.path"));
}

#[test]
fn missing_pyproject_is_reported_on_stderr() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("pdmb")
        .arg("--project")
        .arg(tmp.path())
        .args(["--no-color", "build", "sdist"])
        .assert()
        .failure()
        .code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("pyproject.toml not found"), "stderr: {stderr}");
}

#[test]
fn invalid_config_setting_is_rejected() {
    let (_tmp, project) = prepare_fixture("demo-package");
    let assert = cargo_bin_cmd!("pdmb")
        .arg("--project")
        .arg(&project)
        .args(["--json", "-C", "=oops", "requires", "wheel"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
}

