//! Shell executable discovery and command-line quoting.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::overlay::HostEnvironment;

/// Find `name` on the host snapshot's `PATH`.
///
/// Returns an absolute path without Windows verbatim prefixes, or `None` when
/// the interpreter is not installed.
pub fn find_on_path(name: &str, host: &HostEnvironment) -> Option<PathBuf> {
    let search = host.var_os("PATH").unwrap_or_default();
    match which::which_in(name, Some(search), host.cwd()) {
        Ok(path) => Some(dunce::simplified(&path).to_path_buf()),
        Err(e) => {
            log::debug!("{name} not found on PATH: {e}");
            None
        }
    }
}

/// Quote a program and its arguments into one host-appropriate command line.
pub fn quote_for_shell(program: &Path, args: &[String]) -> String {
    std::iter::once(program.to_string_lossy())
        .chain(args.iter().map(|arg| Cow::Borrowed(arg.as_str())))
        .map(quote_word)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(windows)]
fn quote_word(word: Cow<'_, str>) -> String {
    shell_escape::windows::escape(word).into_owned()
}

#[cfg(not(windows))]
fn quote_word(word: Cow<'_, str>) -> String {
    shell_escape::unix::escape(word).into_owned()
}
