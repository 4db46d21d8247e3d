use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use rstest::rstest;
use shell_harness::shell::ProfileOverlay;
use shell_harness::{HarnessError, InteractiveShell, SessionState, with_shell};

use crate::common::{FakeHook, hook, options, process_is_gone};

#[rstest]
fn test_body_error_is_returned_unchanged_and_shell_is_stopped(hook: FakeHook) {
    let pid = Cell::new(0);
    let err = with_shell("posix", options(&hook), |sh| -> anyhow::Result<()> {
        pid.set(sh.pid());
        anyhow::bail!("body failed on purpose")
    })
    .unwrap_err();

    assert_eq!(err.to_string(), "body failed on purpose");
    assert!(process_is_gone(pid.get()));
}

#[rstest]
fn test_expectation_failure_propagates_as_typed_error(hook: FakeHook) {
    let pid = Cell::new(0);
    let err = with_shell("posix", options(&hook), |sh| {
        pid.set(sh.pid());
        sh.sendline("exit 3")?;
        sh.expect("never printed")?;
        Ok(())
    })
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<HarnessError>(),
        Some(HarnessError::ExpectationMismatch { .. })
    ));
    assert!(process_is_gone(pid.get()));
}

#[rstest]
fn test_panicking_body_still_stops_shell(hook: FakeHook) {
    let pid = Cell::new(0);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        with_shell("posix", options(&hook), |sh| -> anyhow::Result<()> {
            pid.set(sh.pid());
            panic!("body panicked on purpose");
        })
    }));

    let payload = outcome.unwrap_err();
    assert_eq!(
        payload.downcast_ref::<&str>(),
        Some(&"body panicked on purpose")
    );
    assert_ne!(pid.get(), 0);
    assert!(process_is_gone(pid.get()));
}

#[rstest]
fn test_drop_stops_shell(hook: FakeHook) {
    let sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    let pid = sh.pid();
    assert!(!process_is_gone(pid));
    drop(sh);
    assert!(process_is_gone(pid));
}

#[rstest]
fn test_close_does_not_wait_for_busy_shell(hook: FakeHook) {
    let mut sh = InteractiveShell::open("posix", options(&hook)).unwrap();
    // Ignore the polite signals; escalation must still end the shell quickly
    sh.sendline("trap '' INT TERM; sleep 30").unwrap();

    let started = Instant::now();
    sh.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(sh.state(), SessionState::Closed);
    assert!(process_is_gone(sh.pid()));

    // Idempotent
    sh.close().unwrap();
}

#[rstest]
fn test_exit_command_is_sent_first(hook: FakeHook) {
    let overrides = ProfileOverlay::default().exit_command(Some("exit 0"));
    let mut sh = InteractiveShell::open("posix", options(&hook).overrides(overrides)).unwrap();
    assert_eq!(sh.profile().exit_command.as_deref(), Some("exit 0"));
    let pid = sh.pid();
    sh.close().unwrap();
    assert!(process_is_gone(pid));
}
