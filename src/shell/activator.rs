//! Path conversion per activator family.
//!
//! Each dialect names an [`ActivatorKind`]; the kind selects a static
//! [`Activator`] that knows whether the dialect reads POSIX or native paths
//! and how it joins a `PATH` list.

use std::ffi::OsStr;
use std::path::Path;

use crate::overlay::HostEnvironment;
use crate::path::{to_native_path, to_posix_path};

/// Capability selector for path conversion and activation behavior.
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
pub enum ActivatorKind {
    Posix,
    #[strum(serialize = "cmd.exe")]
    Cmd,
    Csh,
    Fish,
    #[strum(serialize = "powershell")]
    PowerShell,
}

impl ActivatorKind {
    /// Look up the path-conversion implementation for this kind.
    pub fn activator(self) -> &'static dyn Activator {
        match self {
            Self::Posix => &POSIX,
            Self::Csh => &CSH,
            Self::Fish => &FISH,
            Self::Cmd => &CMD,
            Self::PowerShell => &POWERSHELL,
        }
    }

    /// Whether the dialect reads POSIX-style paths (`/c/Users/...` under MSYS).
    pub fn is_posix_family(self) -> bool {
        matches!(self, Self::Posix | Self::Csh | Self::Fish)
    }
}

/// Path handling for one dialect family.
pub trait Activator: Sync {
    fn kind(&self) -> ActivatorKind;

    /// Separator used when joining a `PATH` list for this dialect.
    fn pathsep(&self) -> &'static str;

    fn to_native(&self, path: &str) -> String {
        to_native_path(path)
    }

    fn to_posix(&self, path: &str) -> String {
        to_posix_path(path)
    }

    /// Convert a host path into the form this dialect reads.
    fn path_conversion(&self, path: &str) -> String {
        if self.kind().is_posix_family() {
            self.to_posix(path)
        } else {
            self.to_native(path)
        }
    }

    fn join_path_list(&self, paths: &[String]) -> String {
        paths.join(self.pathsep())
    }

    /// `PATH` entries a fresh session starts from, in native form.
    ///
    /// Taken from the host snapshot; when the host has no `PATH` a clean
    /// platform default is used instead.
    fn starting_path_entries(&self, host: &HostEnvironment) -> Vec<String> {
        let path = host
            .var_os("PATH")
            .filter(|path| !path.is_empty())
            .unwrap_or(OsStr::new(DEFAULT_PATH));
        std::env::split_paths(path)
            .filter(|entry| !entry.as_os_str().is_empty())
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect()
    }

    /// Convert and join a list of native paths into one `PATH` value.
    fn convert_path_list(&self, paths: &[&Path]) -> String {
        let converted: Vec<String> = paths
            .iter()
            .map(|path| self.path_conversion(&path.to_string_lossy()))
            .collect();
        self.join_path_list(&converted)
    }
}

#[cfg(windows)]
const DEFAULT_PATH: &str = r"C:\Windows\system32;C:\Windows;C:\Windows\System32\Wbem;C:\Windows\System32\WindowsPowerShell\v1.0\";
#[cfg(target_os = "macos")]
const DEFAULT_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";
#[cfg(not(any(windows, target_os = "macos")))]
const DEFAULT_PATH: &str = "/usr/bin";

#[cfg(windows)]
const HOST_PATHSEP: &str = ";";
#[cfg(not(windows))]
const HOST_PATHSEP: &str = ":";

/// sh/bash/zsh, csh/tcsh and fish: POSIX paths joined with `:`.
struct PosixFamily(ActivatorKind);

impl Activator for PosixFamily {
    fn kind(&self) -> ActivatorKind {
        self.0
    }

    fn pathsep(&self) -> &'static str {
        ":"
    }
}

struct CmdExe;

impl Activator for CmdExe {
    fn kind(&self) -> ActivatorKind {
        ActivatorKind::Cmd
    }

    fn pathsep(&self) -> &'static str {
        ";"
    }
}

/// PowerShell reads native paths and joins with the host separator.
struct PowerShell;

impl Activator for PowerShell {
    fn kind(&self) -> ActivatorKind {
        ActivatorKind::PowerShell
    }

    fn pathsep(&self) -> &'static str {
        HOST_PATHSEP
    }
}

static POSIX: PosixFamily = PosixFamily(ActivatorKind::Posix);
static CSH: PosixFamily = PosixFamily(ActivatorKind::Csh);
static FISH: PosixFamily = PosixFamily(ActivatorKind::Fish);
static CMD: CmdExe = CmdExe;
static POWERSHELL: PowerShell = PowerShell;
