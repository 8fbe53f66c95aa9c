//! Real command execution.
//!
//! [`SystemRunner`] is the only place in the crate that spawns a tool.
//! Every child:
//!
//! - runs in its own process group with a parent-death signal
//! - is registered with the global [`ChildRegistry`] while it runs
//! - gets its secret stdin (if any) written and closed before we wait

use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{InstallError, Result};
use crate::process_guard::{self, ChildRegistry, CommandProcessGroup};

use super::{CommandRunner, ToolCommand, ToolOutput};

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    #[track_caller]
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        if process_guard::cancel_requested() {
            return Err(InstallError::Cancelled);
        }

        tracing::info!("exec: {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            InstallError::external(command.to_string(), None, format!("failed to start: {e}"))
        })?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        if let (Some(secret), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            if let Err(e) = stdin.write_all(secret.expose().as_bytes()) {
                tracing::warn!("Failed to write stdin of {}: {}", command.program, e);
            }
            // stdin closes here so the child sees EOF
        }

        let waited = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let output = waited.map_err(|e| {
            InstallError::external(command.to_string(), None, format!("failed to wait: {e}"))
        })?;

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        if result.success {
            tracing::debug!("{} exited successfully", command.program);
        } else {
            tracing::debug!(
                "{} failed with exit code {:?}: {}",
                command.program,
                result.exit_code,
                result.stderr.trim()
            );
        }

        // the signal thread may have killed this child mid-run
        if process_guard::cancel_requested() {
            return Err(InstallError::Cancelled);
        }

        Ok(result)
    }
}
