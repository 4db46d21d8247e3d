use std::process::Command;

use shell_harness::config::{CONFIG_ENV_VAR, TIMEOUT_ENV_VAR};

fn harness_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shell-harness"));
    cmd.env_remove(CONFIG_ENV_VAR)
        .env_remove(TIMEOUT_ENV_VAR)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_list_shows_every_dialect() {
    let output = harness_command().arg("list").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for dialect in ["posix", "bash", "cmd.exe", "tcsh", "fish", "pwsh-preview"] {
        assert!(
            stdout.lines().any(|line| line.starts_with(dialect)),
            "{dialect} missing from:\n{stdout}"
        );
    }
    assert!(stdout.contains("base=powershell"));
}

#[test]
fn test_unknown_dialect_exits_with_error() {
    let output = harness_command()
        .args(["query", "ksh", "PATH"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Unknown shell dialect: ksh"),
        "stderr: {stderr}"
    );
}

#[test]
#[cfg(unix)]
fn test_query_prints_values() {
    let hook = crate::common::FakeHook::new();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("harness.toml");
    std::fs::write(
        &config,
        format!("timeout-secs = 10\n[hook]\ncommand = {:?}\n", hook.command()),
    )
    .unwrap();

    let output = harness_command()
        .args(["query", "posix", "HARNESS_CLI_VALUE", "HARNESS_CLI_UNSET", "--config"])
        .arg(&config)
        .env("HARNESS_CLI_VALUE", "abc")
        .env_remove("HARNESS_CLI_UNSET")
        .env_remove("CONDA_SHLVL")
        .env_remove("ENV")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    insta::assert_snapshot!(stdout, @r"
    HARNESS_CLI_VALUE=abc
    HARNESS_CLI_UNSET unset
    ");
}
