//! Native <-> POSIX path conversion.
//!
//! MSYS2 and Git Bash expect `/c/Users/...` style paths while `cmd.exe` and
//! PowerShell want `C:\Users\...`. On Windows both directions go through
//! `cygpath`; everywhere else conversion is the identity.

#[cfg(windows)]
use std::path::PathBuf;

#[cfg(windows)]
use crate::shell_exec::run;
#[cfg(windows)]
use std::process::Command;

/// Convert a path to POSIX format for MSYS-style shells.
///
/// On Windows, uses `cygpath -u` to convert paths like `C:\Users\test` to
/// `/c/Users/test`. This handles UNC paths (`\\server\share`) and verbatim
/// paths (`\\?\C:\...`) too.
///
/// If cygpath is not available, returns the path unchanged.
///
/// # Examples
/// - `C:\Users\test\repo` → `/c/Users/test/repo`
/// - `\\?\C:\repo` → `/c/repo`
/// - `/tmp/test/repo` → `/tmp/test/repo` (unchanged on Unix)
#[cfg(windows)]
pub fn to_posix_path(path: &str) -> String {
    cygpath("-u", path)
}

#[cfg(not(windows))]
pub fn to_posix_path(path: &str) -> String {
    path.to_string()
}

/// Convert a POSIX-style path back to the host's native form.
///
/// Inverse of [`to_posix_path`]: `/c/Users/test` → `C:\Users\test` on Windows.
#[cfg(windows)]
pub fn to_native_path(path: &str) -> String {
    cygpath("-w", path)
}

#[cfg(not(windows))]
pub fn to_native_path(path: &str) -> String {
    path.to_string()
}

#[cfg(windows)]
fn cygpath(flag: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let Some(cygpath) = find_cygpath() else {
        return path.to_string();
    };

    let mut cmd = Command::new(&cygpath);
    cmd.arg(flag).arg(path);
    let Ok(output) = run(&mut cmd, None) else {
        return path.to_string();
    };

    if output.status.success() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        path.to_string()
    }
}

/// Find cygpath.exe, first on PATH and then next to a Git for Windows bash.
///
/// cygpath is always at `usr/bin/cygpath.exe` in a Git for Windows installation.
#[cfg(windows)]
fn find_cygpath() -> Option<PathBuf> {
    if let Ok(path) = which::which("cygpath") {
        return Some(path);
    }

    let git = which::which("git").ok()?;
    let git_root = git.parent()?.parent()?;
    let cygpath = git_root.join("usr").join("bin").join("cygpath.exe");
    cygpath.exists().then_some(cygpath)
}
