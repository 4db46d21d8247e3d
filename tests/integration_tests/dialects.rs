//! Dialects beyond `sh`. Each test skips when its shell is not installed.

use rstest::rstest;
use shell_harness::overlay::SHLVL_VAR;
use shell_harness::shell::{ACTIVATE, ProfileOverlay};
use shell_harness::with_shell;

use crate::common::{FakeHook, hook, is_shell_available, options};

#[rstest]
#[case::bash("bash")]
#[case::dash("dash")]
#[case::zsh("zsh")]
fn test_posix_family_activation(hook: FakeHook, #[case] dialect: &str) {
    if !is_shell_available(dialect) {
        eprintln!("Skipping test: {dialect} not installed");
        return;
    }
    with_shell(dialect, options(&hook), |sh| {
        sh.assert_env_var(SHLVL_VAR, "0", false)?;
        sh.sendline(&format!("conda{ACTIVATE}base"))?;
        sh.assert_env_var(SHLVL_VAR, "1", false)?;
        Ok(())
    })
    .unwrap();
}

/// The fake hook only speaks POSIX; other families get an empty init command.
#[rstest]
#[case::fish("fish", "set -gx HARNESS_VALUE 'hello there'")]
#[case::csh("csh", "setenv HARNESS_VALUE 'hello there'")]
#[case::tcsh("tcsh", "setenv HARNESS_VALUE 'hello there'")]
#[case::pwsh("pwsh", "$Env:HARNESS_VALUE = 'hello there'")]
fn test_round_trip_without_hook(hook: FakeHook, #[case] dialect: &str, #[case] set: &str) {
    if !is_shell_available(dialect) {
        eprintln!("Skipping test: {dialect} not installed");
        return;
    }
    let options = options(&hook).overrides(ProfileOverlay::default().init_command(""));
    let value = with_shell(dialect, options, |sh| {
        sh.sendline(set)?;
        Ok(sh.get_env_var("HARNESS_VALUE", None)?)
    })
    .unwrap();
    assert_eq!(value.as_deref(), Some("hello there"));
}
