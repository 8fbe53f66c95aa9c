//! Error handling module for archsetup
//!
//! Provides the error taxonomy shared by the selection engine and the
//! install pipeline. Only `Validation` is recovered locally (the owning
//! selection step re-prompts); everything else escalates to the single
//! top-level handler in `recovery`.

use std::fmt;
use std::panic::Location;

use thiserror::Error;

/// Source location where an external operation was found to have failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    /// Location of the caller (propagates through `#[track_caller]` frames).
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Main error type for archsetup
#[derive(Error, Debug)]
pub enum InstallError {
    /// Operator answer failed a field rule (empty, mismatched, unrecognized)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operator-initiated cancellation
    #[error("Installation cancelled by operator")]
    Cancelled,

    /// Persisted configuration could not be read or parsed
    #[error("Configuration load error: {0}")]
    ConfigLoad(String),

    /// A capability provider reported failure
    #[error("{command} failed{}: {stderr}", exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    ExternalOperation {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        location: SourceLocation,
    },

    /// The prompt provider itself failed (closed input, terminal error)
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// A bounded selection step ran out of attempts
    #[error("No valid answer for {field} after {attempts} attempt(s)")]
    RetriesExhausted { field: String, attempts: u32 },

    /// IO errors (target-root edits, config file, working directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (block-device enumeration)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for archsetup operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration load error
    pub fn config_load(msg: impl Into<String>) -> Self {
        Self::ConfigLoad(msg.into())
    }

    /// Create a prompt error
    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt(msg.into())
    }

    /// Create an external operation error located at the caller.
    #[track_caller]
    pub fn external(
        command: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ExternalOperation {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
            location: SourceLocation::caller(),
        }
    }

    /// Returns true for errors the owning selection step recovers from.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true for operator cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Process exit status this error terminates with.
    ///
    /// External failures keep the failing command's own status; cancellation
    /// uses the conventional interrupt status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 130,
            Self::ExternalOperation {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }

    /// Location marker for the diagnostic record, if one was captured.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::ExternalOperation { location, .. } => Some(location),
            _ => None,
        }
    }
}
