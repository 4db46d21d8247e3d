//! Drive interactive shell sessions across dialects.
//!
//! The harness spawns a real shell (bash, zsh, cmd.exe, PowerShell, fish, ...),
//! loads a shell-integration hook into it, and checks the environment side
//! effects the hook produces. Each dialect is described by a
//! [`ShellProfile`](shell::ShellProfile) that only states its differences from
//! a base dialect.
//!
//! Start with [`with_shell`] or [`InteractiveShell::open`].

pub mod config;
pub mod discovery;
pub mod error;
pub mod overlay;
pub mod path;
pub mod session;
pub mod shell;
pub mod shell_exec;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use session::{InteractiveShell, SessionState, ShellOptions, with_shell};
pub use shell::{Dialect, ProfileOverlay, ShellProfile};
