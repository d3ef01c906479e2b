use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn txexec() -> Command {
    let mut cmd = Command::new(cargo_bin!());
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args(["--operation", "ADD_EMPLOYEE", "--audit", "--tag", "region=eu"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("\"operation\": \"ADD_EMPLOYEE\""))
        .stdout(predicate::str::contains("\"region\": \"eu\""))
        .stdout(predicate::str::contains("\"retryCount\": 0"));

    Ok(())
}

#[test]
fn test_cli_retries_until_success() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args([
        "--max-attempts",
        "3",
        "--backoff",
        "fixed",
        "--base-delay-ms",
        "10",
        "--fail-times",
        "2",
        "--no-jitter",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"retryCount\": 2"))
        .stdout(predicate::str::contains("\"attempt\": 3"));

    Ok(())
}

#[test]
fn test_cli_reports_timeout() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args(["--timeout-ms", "50", "--latency-ms", "500"]);

    cmd.assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("\"success\": false"))
        .stdout(predicate::str::contains("\"code\": \"Timeout\""));

    Ok(())
}

#[test]
fn test_cli_denies_missing_permission() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args(["--user", "bob", "--grant", "READ", "--fail-times", "5"]);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("\"code\": \"PermissionDenied\""))
        .stdout(predicate::str::contains("\"retryable\": false"));

    Ok(())
}

#[test]
fn test_cli_grants_permission_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.env("TXEXEC_USER", "alice")
        .env("TXEXEC_GRANTS", "READ,WRITE");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));

    Ok(())
}

#[test]
fn test_cli_rejects_zero_timeout() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args(["--timeout-ms", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("timeoutMs must be greater than zero"));

    Ok(())
}

#[test]
fn test_cli_sync_notification_failure_is_warning() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = txexec();
    cmd.args(["--notify", "sync", "--fail-notification"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("NotificationDeliveryFailure"));

    Ok(())
}
