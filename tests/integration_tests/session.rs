use std::path::Path;
use std::time::{Duration, Instant};

use rstest::rstest;
use shell_harness::error::MismatchReason;
use shell_harness::overlay::{AUTO_ACTIVATE_VAR, SHLVL_VAR};
use shell_harness::shell::{ACTIVATE, DEACTIVATE};
use shell_harness::{HarnessConfig, HarnessError, InteractiveShell, SessionState, with_shell};

use crate::common::{FakeHook, hook, is_shell_available, isolated_host, options, test_config};

#[rstest]
fn test_open_reaches_initialized(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    assert_eq!(sh.state(), SessionState::Initialized);
    assert!(sh.shell_path().is_absolute());
    assert_eq!(sh.shell_path().parent(), Some(sh.shell_dir()));
    assert!(sh.command_line().ends_with("sh"), "{}", sh.command_line());
    assert_eq!(sh.overlay().get(AUTO_ACTIVATE_VAR), Some("false"));

    sh.sendline("true").unwrap();
    assert_eq!(sh.state(), SessionState::Interacting);
    sh.close().unwrap();
    assert_eq!(sh.state(), SessionState::Closed);
}

#[rstest]
fn test_clear_twice_positions_after_second_marker(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.sendline("echo stale-one; echo stale-two").unwrap();
    sh.clear().unwrap();
    sh.clear().unwrap();

    sh.sendline("echo fresh").unwrap();
    let found = sh.expect(r"([a-z-]+)\r?\n").unwrap();
    assert_eq!(found.group(1), Some("fresh"));
    assert_eq!(found.before, "");
}

#[rstest]
fn test_clear_consumes_earlier_stderr(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.sendline("echo stale-err >&2; HARNESS_AFTER_ERR=ok; export HARNESS_AFTER_ERR")
        .unwrap();
    sh.clear().unwrap();

    sh.sendline("echo fresh").unwrap();
    let found = sh.expect(r"([a-z-]+)\r?\n").unwrap();
    assert_eq!(found.group(1), Some("fresh"));
    assert_eq!(found.before, "");
    assert_eq!(
        sh.get_env_var("HARNESS_AFTER_ERR", None).unwrap().as_deref(),
        Some("ok")
    );
}

#[rstest]
#[case::plain("hello")]
#[case::spaces("two words")]
#[case::path("/usr/local/bin:/usr/bin")]
fn test_get_env_var_round_trip(hook: FakeHook, #[case] value: &str) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.sendline(&format!(
        "HARNESS_VALUE={}; export HARNESS_VALUE",
        shell_escape::unix::escape(value.into())
    ))
    .unwrap();
    assert_eq!(
        sh.get_env_var("HARNESS_VALUE", None).unwrap().as_deref(),
        Some(value)
    );
}

#[rstest]
fn test_get_env_var_default_when_unset_or_empty(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    assert_eq!(sh.get_env_var("HARNESS_NEVER_SET", None).unwrap(), None);
    assert_eq!(
        sh.get_env_var("HARNESS_NEVER_SET", Some("fallback"))
            .unwrap()
            .as_deref(),
        Some("fallback")
    );

    sh.sendline("HARNESS_EMPTY=; export HARNESS_EMPTY").unwrap();
    assert_eq!(
        sh.get_env_var("HARNESS_EMPTY", Some("fallback"))
            .unwrap()
            .as_deref(),
        Some("fallback")
    );
}

#[rstest]
fn test_assert_env_var_regex_and_exact(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.sendline("HARNESS_FLAG=true; export HARNESS_FLAG").unwrap();
    sh.assert_env_var("HARNESS_FLAG", "1|true", false).unwrap();

    sh.sendline("HARNESS_DOTTED='a.b*c'; export HARNESS_DOTTED")
        .unwrap();
    sh.assert_env_var("HARNESS_DOTTED", "a.b*c", true).unwrap();
    // Exact matching resynchronizes, so the next query starts clean
    assert_eq!(
        sh.get_env_var("HARNESS_FLAG", None).unwrap().as_deref(),
        Some("true")
    );
}

#[rstest]
fn test_harness_variables_reach_the_shell(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.assert_env_var(AUTO_ACTIVATE_VAR, "false", false).unwrap();
    sh.assert_env_var("CONDA_AUTO_STACK", "0", false).unwrap();
    sh.assert_env_var("CONDA_CHANGEPS1", "true", false).unwrap();

    let path = sh.get_env_var("PATH", None).unwrap().unwrap();
    let shell_dir = sh.shell_dir().to_string_lossy().into_owned();
    assert!(
        path.split(':').any(|entry| entry == shell_dir),
        "{shell_dir} not in {path}"
    );
}

#[rstest]
fn test_query_without_reply_times_out(hook: FakeHook) {
    let config = HarnessConfig {
        timeout_secs: 1.0,
        ..test_config(&hook)
    };
    let mut sh = InteractiveShell::open("posix", options(&hook).config(config)).unwrap();
    sh.sendline("echo unrelated").unwrap();

    let started = Instant::now();
    let err = sh.expect(r"HARNESS_NEVER_PRINTED\r?\n").unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        HarnessError::ExpectationTimeout {
            timeout, before, ..
        } => {
            assert_eq!(timeout, Duration::from_secs(1));
            assert!(before.contains("unrelated"), "{before:?}");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }

    // A failed expectation leaves the session usable
    assert_eq!(sh.state(), SessionState::Interacting);
    sh.clear().unwrap();
    sh.sendline("HARNESS_AFTER=ok; export HARNESS_AFTER").unwrap();
    assert_eq!(
        sh.get_env_var("HARNESS_AFTER", None).unwrap().as_deref(),
        Some("ok")
    );
}

#[rstest]
fn test_exited_shell_reports_closed(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    sh.sendline("exit 0").unwrap();
    let err = sh.expect("never").unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ExpectationMismatch {
            reason: MismatchReason::Closed,
            ..
        }
    ));
    assert!(err.is_expectation_failure());
}

#[rstest]
fn test_invalid_pattern(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    let err = sh.expect("(unclosed").unwrap_err();
    assert!(matches!(err, HarnessError::InvalidPattern { .. }));
}

#[rstest]
fn test_activation_depth_end_to_end(hook: FakeHook) {
    // The host claims three stacked environments; init deactivates them all
    let host = isolated_host().with_var(SHLVL_VAR, "3");
    with_shell("posix", options(&hook).host(host), |sh| {
        sh.assert_env_var(SHLVL_VAR, "0", false)?;
        sh.sendline(&format!("conda{DEACTIVATE}base"))?;
        sh.assert_env_var(SHLVL_VAR, "0", false)?;

        sh.sendline(&format!("conda{ACTIVATE}base"))?;
        sh.assert_env_var(SHLVL_VAR, "1", false)?;
        assert_eq!(sh.get_env_var(SHLVL_VAR, None)?.as_deref(), Some("1"));

        sh.sendline(&format!("conda{DEACTIVATE}base"))?;
        sh.assert_env_var(SHLVL_VAR, "0", false)?;
        Ok(())
    })
    .unwrap();
}

#[rstest]
fn test_bash_session(hook: FakeHook) {
    if !is_shell_available("bash") {
        eprintln!("Skipping test: bash not installed");
        return;
    }
    let value = with_shell("bash", options(&hook), |sh| {
        sh.sendline("export HARNESS_VALUE=\"$BASH_VERSION\"")?;
        Ok(sh.get_env_var("HARNESS_VALUE", None)?)
    })
    .unwrap();
    assert!(value.is_some_and(|v| !v.is_empty()));
}

#[rstest]
fn test_explicit_shell_path(hook: FakeHook) {
    let sh_path = which::which("sh").unwrap();
    let sh = InteractiveShell::open("posix", options(&hook).shell_path(&sh_path)).unwrap();
    assert_eq!(sh.shell_path(), dunce::simplified(&sh_path));

    let err = InteractiveShell::open(
        "posix",
        options(&hook).shell_path(Path::new("/nonexistent/bin/sh")),
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::ExecutableNotFound { .. }));
}

#[rstest]
fn test_missing_interpreter_is_reported(hook: FakeHook) {
    let host = isolated_host().with_var("PATH", "");
    let err = InteractiveShell::open("bash", options(&hook).host(host)).unwrap_err();
    match err {
        HarnessError::ExecutableNotFound { dialect, program } => {
            assert_eq!(dialect, "bash");
            assert_eq!(program, "bash");
        }
        other => panic!("expected ExecutableNotFound, got {other:?}"),
    }
}

#[rstest]
fn test_unknown_dialect_fails_before_spawn(hook: FakeHook) {
    let err = InteractiveShell::open("ksh93", options(&hook)).unwrap_err();
    assert!(matches!(err, HarnessError::UnknownDialect { .. }));
}
