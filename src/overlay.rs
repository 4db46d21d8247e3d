//! Host environment snapshot and the per-session environment overlay.
//!
//! A session never inherits ambient process state implicitly: the host
//! environment is captured once into a [`HostEnvironment`], and the child is
//! started with exactly the variables in its [`EnvOverlay`].

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::shell::Activator;

/// Disables auto-activation of the default environment.
pub const AUTO_ACTIVATE_VAR: &str = "CONDA_AUTO_ACTIVATE_BASE";
/// Disables stacking environments on activation.
pub const AUTO_STACK_VAR: &str = "CONDA_AUTO_STACK";
/// Forces the hook to modify the prompt.
pub const CHANGE_PROMPT_VAR: &str = "CONDA_CHANGEPS1";
/// Activation-stack depth maintained by the hook.
pub const SHLVL_VAR: &str = "CONDA_SHLVL";
/// Makes MSYS2 shells keep the inherited `PATH` instead of starting fresh.
pub const MSYS2_PATH_TYPE_VAR: &str = "MSYS2_PATH_TYPE";
/// Makes MSYS2 login shells stay in the invoking directory.
pub const CHERE_INVOKING_VAR: &str = "CHERE_INVOKING";

/// Environment variable keys compare case-insensitively on Windows.
fn same_key(a: &OsStr, b: &OsStr) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// A point-in-time copy of the host's environment and working directory.
///
/// Keys and values are kept as raw OS strings, so variables that are not
/// valid Unicode still reach the child unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    vars: IndexMap<OsString, OsString>,
    cwd: PathBuf,
}

impl HostEnvironment {
    /// Snapshot the current process environment.
    pub fn capture() -> Result<Self, HarnessError> {
        let cwd = std::env::current_dir()
            .map_err(|e| HarnessError::io("Failed to read current directory", e))?;
        let vars = std::env::vars_os().collect();
        Ok(Self { vars, cwd })
    }

    /// A snapshot with no variables.
    pub fn empty(cwd: impl Into<PathBuf>) -> Self {
        Self {
            vars: IndexMap::new(),
            cwd: cwd.into(),
        }
    }

    pub fn with_var(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        set_var(&mut self.vars, key.into(), value.into());
        self
    }

    pub fn without_var(mut self, key: &str) -> Self {
        self.vars
            .retain(|existing, _| !same_key(existing, OsStr::new(key)));
        self
    }

    /// The raw value of `key`.
    pub fn var_os(&self, key: &str) -> Option<&OsStr> {
        lookup(&self.vars, key)
    }

    /// The value of `key`, if it is set and valid Unicode.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.var_os(key)?.to_str()
    }

    pub fn vars(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

fn set_var(vars: &mut IndexMap<OsString, OsString>, key: OsString, value: OsString) {
    if cfg!(windows) {
        vars.retain(|existing, _| !same_key(existing, &key));
    }
    vars.insert(key, value);
}

fn lookup<'a>(vars: &'a IndexMap<OsString, OsString>, key: &str) -> Option<&'a OsStr> {
    vars.iter()
        .find(|(existing, _)| same_key(existing, OsStr::new(key)))
        .map(|(_, value)| value.as_os_str())
}

/// The complete environment a session's child process starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: IndexMap<OsString, OsString>,
}

impl EnvOverlay {
    /// Host variables plus the harness variables, path-converted for `activator`.
    ///
    /// `PATH` becomes the activator's starting entries followed by `shell_dir`.
    pub fn build(
        host: &HostEnvironment,
        activator: &dyn Activator,
        shell_dir: &Path,
        config: &HarnessConfig,
    ) -> Self {
        let mut overlay = Self {
            vars: host.vars.clone(),
        };

        overlay.set(AUTO_ACTIVATE_VAR, "false");
        overlay.set(AUTO_STACK_VAR, "0");
        overlay.set(CHANGE_PROMPT_VAR, "true");
        overlay.set(
            &config.library_path_var,
            activator.path_conversion(&config.source_root.to_string_lossy()),
        );

        let starting = activator.starting_path_entries(host);
        let mut entries: Vec<&Path> = starting.iter().map(Path::new).collect();
        entries.push(shell_dir);
        overlay.set("PATH", activator.convert_path_list(&entries));

        if cfg!(windows) && activator.kind().is_posix_family() {
            overlay.set(MSYS2_PATH_TYPE_VAR, "inherit");
            overlay.set(CHERE_INVOKING_VAR, "1");
        }
        overlay
    }

    pub fn set(&mut self, key: &str, value: impl Into<OsString>) {
        set_var(&mut self.vars, key.into(), value.into());
    }

    /// The value of `key`, if it is set and valid Unicode.
    pub fn get(&self, key: &str) -> Option<&str> {
        lookup(&self.vars, key)?.to_str()
    }

    pub fn get_os(&self, key: &str) -> Option<&OsStr> {
        lookup(&self.vars, key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
