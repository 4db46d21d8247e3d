// Sessions drive real shells; the POSIX tests run `sh`, which every Unix host has.
#[cfg(feature = "cli")]
pub mod cli;
#[cfg(all(unix, feature = "shell-integration-tests"))]
pub mod dialects;
#[cfg(unix)]
pub mod session;
#[cfg(unix)]
pub mod teardown;
