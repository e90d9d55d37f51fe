//! Binary-level tests for `dashpoll`.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn widget_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn dashpoll() -> Command {
    let mut cmd = Command::cargo_bin("dashpoll").unwrap();
    cmd.env_remove("DASHPOLL_BACKEND")
        .env_remove("DASHPOLL_WIDGETS")
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_demo_run_prints_updates_and_exits() {
    let file = widget_file(
        r#"{ "widgets": [
            { "source": "pihole", "metric": "queries" },
            { "source": "proxmox-1", "metric": "cpu" }
        ] }"#,
    );

    dashpoll()
        .args(["--demo", "--demo-failure-ratio", "0", "--duration", "2", "-w"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pihole/queries"))
        .stdout(predicate::str::contains("proxmox-1/cpu"));
}

#[test]
fn test_unreachable_backend_logs_fetch_failure() {
    let file = widget_file(r#"{ "widgets": [{ "source": "proxmox-1", "metric": "cpu" }] }"#);

    dashpoll()
        .args(["-b", "http://127.0.0.1:9", "--duration", "1", "-w"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("fetch failed"));
}

#[test]
fn test_overridden_metric_never_reaches_the_backend() {
    let file = widget_file(r#"{ "widgets": [{ "source": "proxmox-1", "metric": "cpu" }] }"#);

    dashpoll()
        .args(["-b", "http://127.0.0.1:9", "--override", "cpu=55", "--duration", "1", "-w"])
        .arg(file.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("fetch failed").not());
}

#[test]
fn test_missing_widget_file_fails() {
    dashpoll()
        .args(["--demo", "-w", "/nonexistent/widgets.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("widget file /nonexistent/widgets.json"));
}

#[test]
fn test_malformed_widget_file_fails() {
    let file = widget_file(r#"{ "widgets": "#);

    dashpoll()
        .args(["--demo", "-w"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("widget file"));
}
