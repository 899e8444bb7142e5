//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("saasguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "SaaS application discovery and risk scoring",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("saasguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("saasguard"));
}

#[test]
fn test_scan_subcommand_exists() {
    Command::cargo_bin("saasguard")
        .unwrap()
        .args(["scan", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_list_subcommand_exists() {
    Command::cargo_bin("saasguard")
        .unwrap()
        .args(["schedule", "list", "--help"])
        .assert()
        .success();
}

#[test]
fn test_table_check_runs_on_embedded_table() {
    Command::cargo_bin("saasguard")
        .unwrap()
        .args(["table", "check"])
        .assert()
        .success()
        .stdout(predicates::str::contains("valid"));
}

#[test]
fn test_scan_unknown_subject_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = format!(
        "db_path = \"{}\"\n",
        dir.path().join("smoke.db").display()
    );
    let config_path = dir.path().join("saasguard.toml");
    std::fs::write(&config_path, config).unwrap();

    Command::cargo_bin("saasguard")
        .unwrap()
        .args([
            "--config",
            config_path.to_str().unwrap(),
            "scan",
            "--subject",
            "ghost",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("unknown subject"));
}
