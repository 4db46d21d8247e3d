//! The dialect registry and inheritance resolution.
//!
//! Resolution is a pure two-step merge: build the base record (following at
//! most [`MAX_BASE_HOPS`] base links), then overlay the named dialect's own
//! fields on top.

use std::sync::OnceLock;

use indexmap::IndexMap;

use super::{ActivatorKind, Dialect, ProfileOverlay, ShellProfile};
use crate::error::HarnessError;

/// Base links followed from a named dialect before resolution gives up.
///
/// The builtin table only uses one level; the second hop is tolerated so a
/// custom table with a nested base still resolves.
pub const MAX_BASE_HOPS: usize = 2;

const POSIX_INIT: &str = concat!(
    r#"eval "$({{ hook }} shell.posix hook {{ dev_arg }})" "#,
    // CONDA_SHLVL must start at 0 whatever the host had activated, so
    // deactivate more times than any sane CI setup stacks environments
    "&& {{ function }} deactivate ",
    "&& {{ function }} deactivate ",
    "&& {{ function }} deactivate ",
    "&& {{ function }} deactivate",
);

const CMD_INIT: &str = concat!(
    r#"@SET "CONDA_SHLVL=" "#,
    r"&& @CALL {{ package_root }}\shell\condabin\{{ function }}_hook.bat {{ dev_arg }} ",
    r#"&& @SET "CONDA_EXE={{ interpreter }}" "#,
    r#"&& @SET "_CE_M=-m" "#,
    r#"&& @SET "_CE_CONDA={{ function }}""#,
);

// tcsh -x breaks the pipe on macOS, so no trace flag here
const CSH_INIT: &str = concat!(
    r#"set _CONDA_EXE="{{ package_root }}/shell/bin/{{ function }}"; "#,
    "source {{ package_root }}/shell/etc/profile.d/{{ function }}.csh;",
);

const FISH_INIT: &str = "eval ({{ hook }} shell.fish hook {{ dev_arg }})";

const POWERSHELL_INIT: &str = concat!(
    "{{ hook }} shell.powershell hook {{ dev_arg }} ",
    "| Out-String ",
    "| Invoke-Expression ",
    "; {{ function }} deactivate ",
    "; {{ function }} deactivate ",
    "; {{ function }} deactivate ",
    "; {{ function }} deactivate",
);

/// MSYS2's login scripts mount the filesystem; without `-l`, `/c` is `/cygdrive/c`.
const BASH_ARGS: &[&str] = if cfg!(windows) { &["-l"] } else { &[] };

/// One registry entry: a dialect, its optional base, and its own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpec {
    pub dialect: Dialect,
    pub base: Option<Dialect>,
    pub overlay: ProfileOverlay,
}

impl ProfileSpec {
    pub fn new(dialect: Dialect, overlay: ProfileOverlay) -> Self {
        Self {
            dialect,
            base: None,
            overlay,
        }
    }

    pub fn inheriting(dialect: Dialect, base: Dialect, overlay: ProfileOverlay) -> Self {
        Self {
            dialect,
            base: Some(base),
            overlay,
        }
    }
}

fn builtin_specs() -> Vec<ProfileSpec> {
    use ActivatorKind as A;
    use Dialect as D;

    let inherit = ProfileOverlay::default;
    vec![
        ProfileSpec::new(
            D::Posix,
            inherit()
                .activator(A::Posix)
                .init_command(POSIX_INIT)
                .print_env_var(r#"echo "${{ name }}""#),
        ),
        ProfileSpec::inheriting(D::Bash, D::Posix, inherit().args(BASH_ARGS.iter().copied())),
        ProfileSpec::inheriting(D::Dash, D::Posix, inherit()),
        ProfileSpec::inheriting(D::Zsh, D::Posix, inherit()),
        ProfileSpec::new(
            D::Cmd,
            inherit()
                .activator(A::Cmd)
                .init_command(CMD_INIT)
                .print_env_var("@ECHO %{{ name }}%"),
        ),
        ProfileSpec::new(
            D::Csh,
            inherit()
                .activator(A::Csh)
                .init_command(CSH_INIT)
                .print_env_var(r#"echo "${{ name }}""#),
        ),
        ProfileSpec::inheriting(D::Tcsh, D::Csh, inherit()),
        ProfileSpec::new(
            D::Fish,
            inherit()
                .activator(A::Fish)
                .init_command(FISH_INIT)
                .print_env_var("echo ${{ name }}"),
        ),
        // The executable may be powershell, pwsh, or pwsh-preview
        ProfileSpec::new(
            D::PowerShell,
            inherit()
                .activator(A::PowerShell)
                .args(["-NoProfile", "-NoLogo"])
                .init_command(POWERSHELL_INIT)
                .print_env_var("$Env:{{ name }}")
                .exit_command(Some("exit")),
        ),
        ProfileSpec::inheriting(D::Pwsh, D::PowerShell, inherit()),
        ProfileSpec::inheriting(D::PwshPreview, D::PowerShell, inherit()),
    ]
}

static BUILTIN: OnceLock<Registry> = OnceLock::new();

/// Mapping from dialect to its registry entry.
#[derive(Debug, Clone)]
pub struct Registry {
    specs: IndexMap<Dialect, ProfileSpec>,
}

impl Registry {
    /// The builtin table covering every [`Dialect`].
    pub fn builtin() -> &'static Registry {
        BUILTIN.get_or_init(|| Registry::from_specs(builtin_specs()))
    }

    /// Build a custom table. Later entries replace earlier ones for the same dialect.
    pub fn from_specs(specs: impl IntoIterator<Item = ProfileSpec>) -> Self {
        Self {
            specs: specs
                .into_iter()
                .map(|spec| (spec.dialect, spec))
                .collect(),
        }
    }

    pub fn dialects(&self) -> impl Iterator<Item = Dialect> + '_ {
        self.specs.keys().copied()
    }

    pub fn spec(&self, dialect: Dialect) -> Option<&ProfileSpec> {
        self.specs.get(&dialect)
    }

    /// Resolve a dialect by name, applying inheritance.
    pub fn resolve(&self, name: &str) -> Result<ShellProfile, HarnessError> {
        let dialect = name
            .parse::<Dialect>()
            .map_err(|_| HarnessError::UnknownDialect {
                name: name.to_string(),
            })?;
        self.resolve_dialect(dialect)
    }

    pub fn resolve_dialect(&self, dialect: Dialect) -> Result<ShellProfile, HarnessError> {
        let named = self.lookup(dialect)?;
        let mut chain = vec![named];
        while let Some(base) = chain.last().and_then(|spec| spec.base) {
            if chain.len() > MAX_BASE_HOPS {
                let mut names: Vec<String> =
                    chain.iter().map(|spec| spec.dialect.to_string()).collect();
                names.push(base.to_string());
                return Err(HarnessError::InheritanceTooDeep {
                    dialect: dialect.to_string(),
                    chain: names,
                });
            }
            chain.push(self.lookup(base)?);
        }

        // Deepest base first, so each nearer profile overlays it
        let merged = chain
            .iter()
            .rev()
            .fold(ProfileOverlay::default(), |acc, spec| {
                spec.overlay.clone().layered_on(acc)
            });
        log::debug!(
            "Resolved {dialect} via {}",
            chain
                .iter()
                .map(|spec| spec.dialect.name())
                .collect::<Vec<_>>()
                .join(" <- ")
        );

        let missing = |field| HarnessError::IncompleteProfile {
            dialect: dialect.to_string(),
            field,
        };
        Ok(ShellProfile {
            dialect,
            base_dialect: named.base,
            activator: merged.activator.ok_or_else(|| missing("activator"))?,
            invocation_args: merged.invocation_args.unwrap_or_default(),
            init_command: merged.init_command.unwrap_or_default(),
            env_print_template: merged
                .env_print_template
                .ok_or_else(|| missing("env_print_template"))?,
            exit_command: merged.exit_command.flatten(),
        })
    }

    fn lookup(&self, dialect: Dialect) -> Result<&ProfileSpec, HarnessError> {
        self.specs
            .get(&dialect)
            .ok_or_else(|| HarnessError::UnknownDialect {
                name: dialect.to_string(),
            })
    }
}

/// Resolve a dialect against the builtin registry.
pub fn resolve(name: &str) -> Result<ShellProfile, HarnessError> {
    Registry::builtin().resolve(name)
}
