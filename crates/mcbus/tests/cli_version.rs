#![cfg(feature = "cli")]

use std::process::Command;

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_mcbus"))
        .arg("version")
        .output()
        .expect("version command should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("mcbus {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_bus_defaults() {
    let output = Command::new(env!("CARGO_BIN_EXE_mcbus"))
        .args(["version", "--extended"])
        .output()
        .expect("version command should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: mcbus"));
    assert!(stdout.contains("defaults: group=ff01::1 port=26000 max_datagram=32768"));
}

#[test]
fn invalid_client_id_exits_with_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_mcbus"))
        .args([
            "--log-level",
            "error",
            "publish",
            "news",
            "--client-id",
            "bad,id",
        ])
        .output()
        .expect("publish command should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid client id"));
}
