//! External tool invocation.
//!
//! Every privileged operation is an external program (`parted`,
//! `cryptsetup`, `pacstrap`, `arch-chroot`, ...). This module holds:
//!
//! - [`ToolArgs`]: typed argument structs, one per tool invocation shape, so
//!   flag spelling is checked by the compiler rather than at run time
//! - [`ToolCommand`]: the resolved program, argv, environment and optional
//!   secret stdin
//! - [`CommandRunner`]: the seam between the providers and the operating
//!   system, with a real backend ([`SystemRunner`]) and a recording backend
//!   ([`RecordingRunner`]) used by `--dry-run` and the tests
//!
//! # Security
//!
//! Secrets never appear in argv. Tools that need a password read it from
//! stdin (`chpasswd`) or from a [`SecretFile`](crate::secret::SecretFile)
//! (`cryptsetup --key-file`).

pub mod args;
mod recording;
mod system;

pub use recording::RecordingRunner;
pub use system::SystemRunner;

use std::fmt;

use crate::error::{InstallError, Result};
use crate::secret::Secret;

/// Typed arguments for one external tool invocation.
///
/// # Contract
///
/// - `program()`: executable name, resolved through PATH
/// - `to_cli_args()`: argv after the program name, exactly as the tool parses it
/// - `get_env_vars()`: extra environment for the child
pub trait ToolArgs {
    fn program(&self) -> &'static str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn to_command(&self) -> ToolCommand {
        ToolCommand {
            program: self.program().to_string(),
            args: self.to_cli_args(),
            env: self.get_env_vars(),
            stdin: None,
        }
    }
}

/// A fully resolved external command.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Fed to the child's stdin and never logged.
    pub stdin: Option<Secret>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: Secret) -> Self {
        self.stdin = Some(input);
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))?;
        if self.stdin.is_some() {
            f.write_str(" <<< [redacted]")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
        }
    }

    /// Turn a failed run into an `ExternalOperation` error located at the caller.
    #[track_caller]
    pub fn ensure_success(self, command: &ToolCommand) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(InstallError::external(
                command.to_string(),
                self.exit_code,
                self.stderr.trim(),
            ))
        }
    }
}

/// Executes tool commands.
///
/// `run` returns `Err` only when the command could not be started at all;
/// a non-zero exit is reported through [`ToolOutput::success`].
pub trait CommandRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput>;
}
