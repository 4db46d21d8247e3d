//! Harness error types
//!
//! **`HarnessError`** is a typed enum for every failure the harness surfaces.
//! Use `.into()` to convert to `anyhow::Error` while preserving the type for
//! pattern matching:
//!
//! ```ignore
//! if let Some(HarnessError::ExpectationTimeout { .. }) = err.downcast_ref() {
//!     // slow shell
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Why an expectation ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum MismatchReason {
    /// Both output streams reached end of file
    Closed,
    /// Unconsumed output grew past the configured ceiling
    Overflow,
}

#[derive(Debug)]
pub enum HarnessError {
    /// Requested dialect name is not registered
    UnknownDialect { name: String },
    /// A base chain longer than the registry tolerates
    InheritanceTooDeep { dialect: String, chain: Vec<String> },
    /// Neither the profile nor its base supplies a required field
    IncompleteProfile {
        dialect: String,
        field: &'static str,
    },
    /// The dialect's interpreter could not be located on the host
    ExecutableNotFound { dialect: String, program: String },
    /// No match for a pattern within the read timeout
    ExpectationTimeout {
        pattern: String,
        timeout: Duration,
        before: String,
    },
    /// Stream closed or buffer exhausted without a match
    ExpectationMismatch {
        pattern: String,
        reason: MismatchReason,
        before: String,
    },
    /// An expectation pattern is not a valid regular expression
    InvalidPattern { pattern: String, message: String },
    /// Init or print command template failed to render
    Template { dialect: String, message: String },
    /// Harness configuration could not be read or parsed
    Config {
        path: Option<PathBuf>,
        message: String,
    },
    /// Operating-system level failure (spawn, pipe write, signal)
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the two expectation failures (timeout, closed/overflow).
    pub fn is_expectation_failure(&self) -> bool {
        matches!(
            self,
            Self::ExpectationTimeout { .. } | Self::ExpectationMismatch { .. }
        )
    }
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessError::UnknownDialect { name } => {
                write!(f, "Unknown shell dialect: {name}")
            }
            HarnessError::InheritanceTooDeep { dialect, chain } => {
                write!(
                    f,
                    "Profile {dialect} inherits too deeply: {}",
                    chain.join(" -> ")
                )
            }
            HarnessError::IncompleteProfile { dialect, field } => {
                write!(f, "Profile {dialect} is missing required field {field}")
            }
            HarnessError::ExecutableNotFound { dialect, program } => {
                write!(
                    f,
                    "Cannot find executable {program} for dialect {dialect} on PATH"
                )
            }
            HarnessError::ExpectationTimeout {
                pattern, timeout, ..
            } => {
                write!(
                    f,
                    "Timed out after {:.1}s waiting for {pattern:?}",
                    timeout.as_secs_f64()
                )
            }
            HarnessError::ExpectationMismatch {
                pattern, reason, ..
            } => match reason {
                MismatchReason::Closed => {
                    write!(f, "Shell output closed before matching {pattern:?}")
                }
                MismatchReason::Overflow => {
                    write!(f, "Output buffer full before matching {pattern:?}")
                }
            },
            HarnessError::InvalidPattern { pattern, message } => {
                write!(f, "Invalid pattern {pattern:?}: {message}")
            }
            HarnessError::Template { dialect, message } => {
                write!(f, "Failed to render command for {dialect}: {message}")
            }
            HarnessError::Config { path, message } => match path {
                Some(path) => write!(f, "Invalid config {}: {message}", path.display()),
                None => write!(f, "Invalid config: {message}"),
            },
            HarnessError::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
