//! Shell dialects and their profiles.
//!
//! This module provides:
//! - The closed set of supported [`Dialect`]s
//! - [`ShellProfile`], the fully resolved description of how to drive a dialect
//! - [`ProfileOverlay`], the partial record used both for registry entries and
//!   caller overrides
//! - The [`Registry`] that merges an entry over its base dialect

mod activator;
mod registry;

pub use activator::{Activator, ActivatorKind};
pub use registry::{MAX_BASE_HOPS, ProfileSpec, Registry, resolve};

/// Command fragments for driving the hook function in tests.
///
/// Usage: `format!("{function}{ACTIVATE}{env}")` → `conda activate --dev base`.
pub const ACTIVATE: &str = " activate --dev ";
pub const DEACTIVATE: &str = " deactivate --dev ";
pub const INSTALL: &str = " install --dev ";

/// Supported shell dialects.
///
/// `posix` is the base of the POSIX family and runs plain `sh`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Dialect {
    Posix,
    Bash,
    Dash,
    Zsh,
    #[strum(serialize = "cmd.exe")]
    Cmd,
    Csh,
    Tcsh,
    Fish,
    #[strum(serialize = "powershell")]
    PowerShell,
    Pwsh,
    PwshPreview,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Program searched for on `PATH` when no explicit shell path is given.
    pub fn executable(self) -> &'static str {
        match self {
            Self::Posix => "sh",
            other => other.name(),
        }
    }
}

/// Resolved configuration for one dialect.
///
/// Every field is populated; see [`Registry::resolve`] for how inheritance
/// fills in what a dialect does not declare itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellProfile {
    pub dialect: Dialect,
    pub base_dialect: Option<Dialect>,
    pub activator: ActivatorKind,
    /// Extra arguments used when launching the shell executable
    pub invocation_args: Vec<String>,
    /// Template sent right after spawn; may be empty
    pub init_command: String,
    /// Template producing a command that prints `{{ name }}`
    pub env_print_template: String,
    /// Sent before the session is signaled to terminate
    pub exit_command: Option<String>,
}

impl ShellProfile {
    pub fn dialect_name(&self) -> &'static str {
        self.dialect.name()
    }

    /// Apply caller overrides; explicit values win, including empty ones.
    pub fn with_overrides(self, overrides: &ProfileOverlay) -> Self {
        let ProfileOverlay {
            activator,
            invocation_args,
            init_command,
            env_print_template,
            exit_command,
        } = overrides.clone();
        Self {
            activator: activator.unwrap_or(self.activator),
            invocation_args: invocation_args.unwrap_or(self.invocation_args),
            init_command: init_command.unwrap_or(self.init_command),
            env_print_template: env_print_template.unwrap_or(self.env_print_template),
            exit_command: exit_command.unwrap_or(self.exit_command),
            ..self
        }
    }
}

/// A partial profile: `None` means "inherit", `Some` is an explicit value.
///
/// `Some(String::new())` is a real override to the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileOverlay {
    pub activator: Option<ActivatorKind>,
    pub invocation_args: Option<Vec<String>>,
    pub init_command: Option<String>,
    pub env_print_template: Option<String>,
    /// Outer `None` inherits; `Some(None)` explicitly clears the exit command
    pub exit_command: Option<Option<String>>,
}

impl ProfileOverlay {
    pub fn activator(mut self, kind: ActivatorKind) -> Self {
        self.activator = Some(kind);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invocation_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn init_command(mut self, command: impl Into<String>) -> Self {
        self.init_command = Some(command.into());
        self
    }

    pub fn print_env_var(mut self, template: impl Into<String>) -> Self {
        self.env_print_template = Some(template.into());
        self
    }

    pub fn exit_command(mut self, command: Option<&str>) -> Self {
        self.exit_command = Some(command.map(str::to_string));
        self
    }

    /// Field-by-field merge with `self` taking precedence over `base`.
    pub fn layered_on(self, base: ProfileOverlay) -> ProfileOverlay {
        ProfileOverlay {
            activator: self.activator.or(base.activator),
            invocation_args: self.invocation_args.or(base.invocation_args),
            init_command: self.init_command.or(base.init_command),
            env_print_template: self.env_print_template.or(base.env_print_template),
            exit_command: self.exit_command.or(base.exit_command),
        }
    }
}
