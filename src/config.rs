use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::quote_for_shell;
use crate::error::HarnessError;
use crate::overlay::HostEnvironment;
use crate::shell::ActivatorKind;

/// Names a TOML file to load settings from.
pub const CONFIG_ENV_VAR: &str = "SHELL_HARNESS_CONFIG";
/// Overrides `timeout-secs`.
pub const TIMEOUT_ENV_VAR: &str = "SHELL_HARNESS_TIMEOUT";

/// Configuration for session timing, buffering, and hook invocation.
///
/// # Examples
///
/// ```toml
/// timeout-secs = 30
/// max-buffer = 1048576
/// source-root = "/src/project"
///
/// [hook]
/// interpreter = "/usr/bin/python3"
/// function = "conda"
/// package-root = "/src/project/conda"
/// ```
///
/// Loading order (later sources override earlier ones):
/// 1. Default values
/// 2. The file named by `SHELL_HARNESS_CONFIG`
/// 3. `SHELL_HARNESS_TIMEOUT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Ceiling for each blocking expectation
    pub timeout_secs: f64,
    /// Bytes requested per read from the child's streams
    pub read_chunk: usize,
    /// Unconsumed output allowed before an expectation gives up
    pub max_buffer: usize,
    /// Wait between escalating termination signals
    pub kill_grace_ms: u64,
    /// Placed on `library-path-var` so the hook runs from this tree
    pub source_root: PathBuf,
    pub library_path_var: String,
    pub hook: HookConfig,
}

/// How init commands reach the integration hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct HookConfig {
    /// Interpreter that runs the hook module
    pub interpreter: String,
    /// Shell function the hook installs (and the module it runs)
    pub function: String,
    /// Full hook command, used verbatim instead of `<interpreter> -m <function>`
    pub command: Option<String>,
    /// Root holding the hook's `shell/` scripts (batch and csh dialects)
    pub package_root: PathBuf,
    pub dev_arg: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            read_chunk: 5000,
            max_buffer: 1024 * 1024,
            kill_grace_ms: 200,
            source_root: PathBuf::from("."),
            library_path_var: "PYTHONPATH".to_string(),
            hook: HookConfig::default(),
        }
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            function: "conda".to_string(),
            command: None,
            package_root: PathBuf::from("."),
            dev_arg: "--dev".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let invalid = |message: String| HarnessError::Config {
            path: Some(path.to_path_buf()),
            message,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: Self = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(invalid)?;
        Ok(config)
    }

    /// Defaults, then the config file and overrides named in the host snapshot.
    pub fn from_host(host: &HostEnvironment) -> Result<Self, HarnessError> {
        let mut config = match host.var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            Some(path) => Self::load(Path::new(path))?,
            None => Self::default(),
        };

        if let Some(raw) = host.var(TIMEOUT_ENV_VAR) {
            config.timeout_secs = raw.trim().parse().map_err(|_| HarnessError::Config {
                path: None,
                message: format!("{TIMEOUT_ENV_VAR}={raw:?} is not a number of seconds"),
            })?;
        }
        config.validate().map_err(|message| HarnessError::Config {
            path: None,
            message,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(format!(
                "timeout-secs must be a positive number, got {}",
                self.timeout_secs
            ));
        }
        if self.read_chunk == 0 || self.max_buffer == 0 {
            return Err("read-chunk and max-buffer must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::from_secs(30))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl HookConfig {
    /// The command that prints hook source, in the form `activator` expects.
    ///
    /// POSIX-family shells get a quoted, POSIX-converted interpreter path;
    /// PowerShell gets the native path unquoted so it runs as a command.
    pub fn command_for(&self, activator: ActivatorKind) -> String {
        if let Some(command) = &self.command {
            return command.clone();
        }
        let interpreter = if activator.is_posix_family() {
            let posix = activator.activator().to_posix(&self.interpreter);
            quote_for_shell(Path::new(&posix), &[])
        } else {
            self.interpreter.clone()
        };
        format!("{interpreter} -m {}", self.function)
    }
}
