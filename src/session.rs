//! Interactive shell sessions
//!
//! An [`InteractiveShell`] binds one resolved [`ShellProfile`] to one spawned
//! shell process and drives it with a send/expect protocol:
//!
//! - [`clear`](InteractiveShell::clear) echoes a single-use marker and waits
//!   for it, so the next read starts after everything already printed.
//! - [`get_env_var`](InteractiveShell::get_env_var) and
//!   [`assert_env_var`](InteractiveShell::assert_env_var) print a variable
//!   using the dialect's own syntax and parse the reply.
//!
//! Sessions are torn down on every exit path: [`close`](InteractiveShell::close),
//! [`with_shell`], or `Drop` during unwinding.
//!
//! ```no_run
//! use shell_harness::{ShellOptions, with_shell};
//!
//! with_shell("bash", ShellOptions::default(), |sh| {
//!     sh.assert_env_var("CONDA_SHLVL", "0", false)?;
//!     Ok(())
//! })?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_print::cformat;
use minijinja::{Environment, UndefinedBehavior};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::discovery::{find_on_path, quote_for_shell};
use crate::error::{HarnessError, MismatchReason};
use crate::overlay::{EnvOverlay, HostEnvironment};
use crate::shell::{ActivatorKind, ProfileOverlay, Registry, ShellProfile};
use crate::shell_exec::{ExpectOutcome, Match, Pattern, ShellProcess, SpawnSpec};

/// Lifecycle of an [`InteractiveShell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionState {
    Created,
    Spawned,
    Initialized,
    Interacting,
    Terminating,
    Closed,
}

/// Caller-supplied inputs to [`InteractiveShell::open`].
#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    /// Shell executable to run instead of searching `PATH`
    pub shell_path: Option<PathBuf>,
    /// Layered over the resolved profile
    pub overrides: ProfileOverlay,
    /// Host snapshot; captured from the current process when absent
    pub host: Option<HostEnvironment>,
    /// Loaded from the host snapshot when absent
    pub config: Option<HarnessConfig>,
}

impl ShellOptions {
    pub fn shell_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shell_path = Some(path.into());
        self
    }

    pub fn overrides(mut self, overrides: ProfileOverlay) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn host(mut self, host: HostEnvironment) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// A live shell bound to one profile.
pub struct InteractiveShell {
    profile: ShellProfile,
    shell_path: PathBuf,
    shell_dir: PathBuf,
    command_line: String,
    overlay: EnvOverlay,
    config: HarnessConfig,
    process: ShellProcess,
    state: SessionState,
}

impl InteractiveShell {
    /// Resolve `dialect`, spawn its shell, send the init command, and drain
    /// output to a clean read position.
    pub fn open(dialect: &str, options: ShellOptions) -> Result<Self, HarnessError> {
        let ShellOptions {
            shell_path,
            overrides,
            host,
            config,
        } = options;

        let profile = Registry::builtin()
            .resolve(dialect)?
            .with_overrides(&overrides);
        let host = match host {
            Some(host) => host,
            None => HostEnvironment::capture()?,
        };
        let config = match config {
            Some(config) => config,
            None => HarnessConfig::from_host(&host)?,
        };

        let shell_path = locate_shell(&profile, shell_path, &host)?;
        let shell_dir = shell_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let activator = profile.activator.activator();
        let overlay = EnvOverlay::build(&host, activator, &shell_dir, &config);
        let command_line = quote_for_shell(&shell_path, &profile.invocation_args);
        log::debug!(
            "Opening {} session: {command_line}",
            profile.dialect_name()
        );

        let process = ShellProcess::spawn(&SpawnSpec {
            program: shell_path.clone(),
            args: profile.invocation_args.clone(),
            cwd: host.cwd().to_path_buf(),
            env: overlay
                .iter()
                .map(|(k, v)| (k.to_os_string(), v.to_os_string()))
                .collect(),
            timeout: config.timeout(),
            read_chunk: config.read_chunk,
            max_buffer: config.max_buffer,
            kill_grace: config.kill_grace(),
        })?;

        let mut shell = Self {
            profile,
            shell_path,
            shell_dir,
            command_line,
            overlay,
            config,
            process,
            state: SessionState::Created,
        };
        shell.transition(SessionState::Spawned);

        let init = shell.init_command()?;
        if !init.is_empty() {
            shell.process.send_line(&init)?;
        }
        shell.clear()?;
        shell.transition(SessionState::Initialized);
        Ok(shell)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::debug!(
                "[{}:{}] {} -> {next}",
                self.profile.dialect_name(),
                self.process.pid(),
                self.state
            );
            self.state = next;
        }
    }

    fn interacting(&mut self) {
        if self.state == SessionState::Initialized {
            self.transition(SessionState::Interacting);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn profile(&self) -> &ShellProfile {
        &self.profile
    }

    pub fn shell_path(&self) -> &Path {
        &self.shell_path
    }

    pub fn shell_dir(&self) -> &Path {
        &self.shell_dir
    }

    /// The quoted executable plus invocation arguments.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The complete environment the shell was started with.
    pub fn overlay(&self) -> &EnvOverlay {
        &self.overlay
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Output consumed ahead of the last match.
    pub fn before(&self) -> &str {
        self.process.before()
    }

    /// Text of the last match.
    pub fn after(&self) -> &str {
        self.process.after()
    }

    /// Convert a path the way this dialect expects (POSIX form for the POSIX family).
    pub fn path_conversion(&self, path: &str) -> String {
        self.profile.activator.activator().path_conversion(path)
    }

    pub fn sendline(&mut self, line: &str) -> Result<(), HarnessError> {
        self.interacting();
        self.process.send_line(line)
    }

    /// Wait for `pattern` (a regular expression) in unconsumed output.
    pub fn expect(&mut self, pattern: &str) -> Result<Match, HarnessError> {
        let compiled = Pattern::regex(pattern).map_err(|e| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        self.expect_pattern(&compiled)
    }

    /// Wait for the literal text `expected` in unconsumed output.
    pub fn expect_exact(&mut self, expected: &str) -> Result<Match, HarnessError> {
        self.expect_pattern(&Pattern::exact(expected))
    }

    fn expect_pattern(&mut self, pattern: &Pattern) -> Result<Match, HarnessError> {
        self.interacting();
        let outcome = self.process.expect(pattern);
        let reason = match outcome {
            ExpectOutcome::Matched(found) => return Ok(found),
            ExpectOutcome::TimedOut => None,
            ExpectOutcome::Closed => Some(MismatchReason::Closed),
            ExpectOutcome::Overflow => Some(MismatchReason::Overflow),
        };

        self.print_diagnostics();
        let pattern = pattern.as_str().to_string();
        let before = self.process.before().to_string();
        Err(match reason {
            None => HarnessError::ExpectationTimeout {
                pattern,
                timeout: self.process.timeout(),
                before,
            },
            Some(reason) => HarnessError::ExpectationMismatch {
                pattern,
                reason,
                before,
            },
        })
    }

    fn print_diagnostics(&self) {
        let before = self.process.before();
        let after = self.process.after();
        anstream::eprintln!("{}", cformat!("<dim>before=</>{:?}", before));
        anstream::eprintln!("{}", cformat!("<dim>after=</>{:?}", after));
    }

    /// Echo a fresh marker and consume everything through it.
    pub fn clear(&mut self) -> Result<(), HarnessError> {
        let marker = new_marker("clear");
        self.process.send_line(&format!("echo {marker}"))?;
        self.expect(&format!(r"{}\r?\n", regex::escape(&marker)))?;
        Ok(())
    }

    /// The dialect's command for printing `name`.
    pub fn print_env_var_command(&self, name: &str) -> Result<String, HarnessError> {
        self.render(
            "print",
            &self.profile.env_print_template,
            HashMap::from([("name", name.to_string())]),
        )
    }

    /// Print `name` and check the reply.
    ///
    /// `expected` is a regular expression matched against the reply line
    /// unless `exact` is set, in which case it is matched literally and the
    /// stream is resynchronized with [`clear`](Self::clear).
    pub fn assert_env_var(
        &mut self,
        name: &str,
        expected: &str,
        exact: bool,
    ) -> Result<(), HarnessError> {
        let command = self.print_env_var_command(name)?;
        self.sendline(&command)?;
        if exact {
            self.expect_exact(expected)?;
            self.clear()
        } else {
            self.expect(&format!(r"(?:{expected})\r?\n"))?;
            Ok(())
        }
    }

    /// Print `name` and return its value, or `default` when it is unset or empty.
    pub fn get_env_var(
        &mut self,
        name: &str,
        default: Option<&str>,
    ) -> Result<Option<String>, HarnessError> {
        let command = self.print_env_var_command(name)?;
        self.sendline(&command)?;

        let kind = self.profile.activator;
        let pattern = match echoed_value_pattern(kind, name) {
            Some(pattern) => pattern,
            // The print command's output has no reliable terminator of its
            // own, so fence it with a marker
            None => {
                let marker = new_marker("get_env_var");
                self.process.send_line(&format!("echo {marker}"))?;
                fenced_value_pattern(&marker)
            }
        };
        let found = self.expect(&pattern)?;

        let value = found
            .group(1)
            .filter(|value| !value.is_empty())
            // cmd echoes an undefined variable's reference verbatim
            .filter(|value| kind != ActivatorKind::Cmd || *value != format!("%{name}%"));
        Ok(value
            .map(str::to_string)
            .or_else(|| default.map(str::to_string)))
    }

    fn init_command(&self) -> Result<String, HarnessError> {
        let activator = self.profile.activator.activator();
        let hook = &self.config.hook;
        self.render(
            "init",
            &self.profile.init_command,
            HashMap::from([
                ("hook", hook.command_for(self.profile.activator)),
                ("function", hook.function.clone()),
                ("dev_arg", hook.dev_arg.clone()),
                (
                    "package_root",
                    activator.path_conversion(&hook.package_root.to_string_lossy()),
                ),
                ("interpreter", activator.path_conversion(&hook.interpreter)),
            ]),
        )
    }

    fn render(
        &self,
        purpose: &str,
        template: &str,
        vars: HashMap<&str, String>,
    ) -> Result<String, HarnessError> {
        render_template(self.profile.dialect_name(), purpose, template, vars)
    }

    /// Send the exit command (if any) and terminate the shell.
    ///
    /// Idempotent. Never waits for the shell to exit on its own.
    pub fn close(&mut self) -> Result<(), HarnessError> {
        if matches!(self.state, SessionState::Closed) {
            return Ok(());
        }
        self.transition(SessionState::Terminating);
        if let Some(exit) = self.profile.exit_command.clone()
            && let Err(e) = self.process.send_line(&exit)
        {
            log::debug!("Could not send {exit:?}: {e}");
        }
        let result = self.process.terminate().map(drop);
        self.transition(SessionState::Closed);
        result
    }
}

impl Drop for InteractiveShell {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Teardown of {} session failed: {e}", self.profile.dialect_name());
        }
    }
}

impl std::fmt::Debug for InteractiveShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveShell")
            .field("dialect", &self.profile.dialect_name())
            .field("command_line", &self.command_line)
            .field("pid", &self.process.pid())
            .field("state", &self.state)
            .finish()
    }
}

/// Run `body` inside a session, tearing it down on every exit path.
///
/// The body's error is returned unchanged; a teardown failure only surfaces
/// when the body succeeded.
pub fn with_shell<T>(
    dialect: &str,
    options: ShellOptions,
    body: impl FnOnce(&mut InteractiveShell) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut shell = InteractiveShell::open(dialect, options)?;
    let result = body(&mut shell);
    if let Err(e) = &result {
        anstream::eprintln!("{}", cformat!("<red>Exception encountered:</> {:#}", e));
    }
    let teardown = shell.close();
    match (result, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            log::warn!("Teardown also failed: {teardown}");
            Err(e)
        }
    }
}

fn locate_shell(
    profile: &ShellProfile,
    explicit: Option<PathBuf>,
    host: &HostEnvironment,
) -> Result<PathBuf, HarnessError> {
    let not_found = |program: &str| HarnessError::ExecutableNotFound {
        dialect: profile.dialect_name().to_string(),
        program: program.to_string(),
    };
    match explicit {
        // A bare name is searched for like the default executable
        Some(path) if path.components().count() == 1 && !path.is_absolute() => {
            let name = path.to_string_lossy();
            find_on_path(&name, host).ok_or_else(|| not_found(&name))
        }
        Some(path) => {
            if path.is_file() {
                Ok(dunce::simplified(&path).to_path_buf())
            } else {
                Err(not_found(&path.to_string_lossy()))
            }
        }
        None => {
            let name = profile.dialect.executable();
            find_on_path(name, host).ok_or_else(|| not_found(name))
        }
    }
}

fn new_marker(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Regex capturing the printed value of `name` as group 1, for dialects
/// that echo the print command itself ahead of its output (cmd, PowerShell).
fn echoed_value_pattern(kind: ActivatorKind, name: &str) -> Option<String> {
    let name = regex::escape(name);
    match kind {
        ActivatorKind::Cmd => Some(format!(r"@ECHO %{name}%\r?\n([^\r\n]*)\r?\n")),
        ActivatorKind::PowerShell => Some(format!(r"\$Env:{name}\r?\n([^\r\n]*)\r?\n")),
        _ => None,
    }
}

/// Regex capturing the line right before a `marker` line as group 1.
fn fenced_value_pattern(marker: &str) -> String {
    format!(r"([^\r\n]*)\r?\n{}\r?\n", regex::escape(marker))
}

fn render_template(
    dialect: &str,
    purpose: &str,
    template: &str,
    vars: HashMap<&str, String>,
) -> Result<String, HarnessError> {
    let name = format!("{dialect}-{purpose}");
    let template_error = |e: minijinja::Error| HarnessError::Template {
        dialect: dialect.to_string(),
        message: e.to_string(),
    };

    let context: HashMap<String, minijinja::Value> = vars
        .into_iter()
        .map(|(key, value)| (key.to_string(), minijinja::Value::from(value)))
        .collect();

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let tmpl = env
        .template_from_named_str(&name, template)
        .map_err(template_error)?;
    let rendered = tmpl
        .render(minijinja::Value::from_object(context))
        .map_err(template_error)?;
    log::trace!("[template:{name}] {rendered:?}");
    Ok(rendered)
}
