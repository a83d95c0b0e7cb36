//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("rdulink");
    cmd.env_remove("RDULINK_PORT").env_remove("RDULINK_BAUD");
    cmd
}

const SREC: &str = "S00600006D6174B7\nS1070100DEADBEEFBF\nS9030000FC\n";

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rdulink"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("rdulink"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    // Machines without serial support may fail enumeration; only check
    // that a successful run prints the JSON envelope.
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    if output.status.success() {
        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
        assert_eq!(parsed["ok"], true);
        assert!(parsed["data"]["ports"].is_array());
    }
}

#[test]
fn info_json_describes_record_file() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("image.s19");
    fs::write(&file, SREC).expect("write image");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("info")
        .arg("--json")
        .arg(&file)
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["data"]["format"], "S-record");
    assert_eq!(parsed["data"]["bytes"], 4);
    assert_eq!(parsed["data"]["segments"][0]["start"], 0x100);
    assert_eq!(parsed["data"]["comments"][0], "mat");
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.s19");

    cli_cmd()
        .current_dir(dir.path())
        .arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn convert_srecord_to_intel_hex_on_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("image.s19");
    fs::write(&file, SREC).expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["convert", "--to", "ihex"])
        .arg(&file)
        .assert()
        .success()
        .stdout(":04010000DEADBEEFC3\n:00000001FF\n");
}

#[test]
fn convert_writes_output_file() {
    let dir = tempdir().expect("tempdir should be created");
    let input = dir.path().join("image.hex");
    let output = dir.path().join("image.s19");
    fs::write(&input, ":04010000DEADBEEFC3\n:00000001FF\n").expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["-q", "convert", "--to", "srec", "--chunk", "2"])
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let text = fs::read_to_string(&output).expect("read output");
    assert_eq!(text, "S1050100DEAD6E\nS1050102BEEF4A\nS9030100FB\n");
}

#[test]
fn convert_rejects_corrupt_input() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("bad.s19");
    fs::write(&file, "S1070100DEADBEEFB0\nS9030000FC\n").expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["convert", "--to", "ihex"])
        .arg(&file)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("checksum"));
}

#[test]
fn convert_inverted_window_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("image.s19");
    fs::write(&file, SREC).expect("write image");

    cli_cmd()
        .current_dir(dir.path())
        .args(["convert", "--to", "srec", "--start", "0x200", "--end", "0x100"])
        .arg(&file)
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_local_config_is_a_warning_only() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("rdulink.toml"), "invalid toml [[[").expect("write config");
    fs::write(dir.path().join("image.s19"), SREC).expect("write image");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["info", "image.s19"])
        .output()
        .expect("command should execute");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_zero_on_success() {
    cli_cmd().arg("--help").assert().success().code(0);
    cli_cmd().arg("--version").assert().success().code(0);
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("rdulink"));
}

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    cli_cmd().arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_bad_hex_argument() {
    cli_cmd()
        .args(["receive", "--offset", "0x10000"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("16 bits"));
}
