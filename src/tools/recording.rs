//! Recording command backend.
//!
//! Nothing is executed. Each command is logged and appended to a journal,
//! and a canned [`ToolOutput`] is returned. `--dry-run` uses it to show the
//! full command sequence an installation would run; the tests use it to
//! assert on that sequence and to inject failures.

use std::sync::Mutex;

use crate::error::{InstallError, Result};

use super::{CommandRunner, ToolCommand, ToolOutput};

/// Placeholder UUID answered for `blkid`/`cryptsetup luksUUID` queries.
pub const PLACEHOLDER_UUID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Default)]
pub struct RecordingRunner {
    journal: Mutex<Vec<String>>,
    stdin_seen: Mutex<Vec<String>>,
    responses: Vec<(String, String)>,
    failures: Vec<(String, i32, String)>,
    cancel_on: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner for `--dry-run`: identifier queries answer with a placeholder.
    pub fn dry_run() -> Self {
        Self::new()
            .with_stdout("blkid", PLACEHOLDER_UUID)
            .with_stdout("luksUUID", PLACEHOLDER_UUID)
    }

    /// Commands whose rendered line contains `pattern` print `stdout`.
    pub fn with_stdout(mut self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), stdout.into()));
        self
    }

    /// Commands whose rendered line contains `pattern` exit with `code`.
    pub fn fail_on(mut self, pattern: impl Into<String>, code: i32, stderr: impl Into<String>) -> Self {
        self.failures.push((pattern.into(), code, stderr.into()));
        self
    }

    /// The first command matching `pattern` behaves as if the operator
    /// interrupted it.
    pub fn cancel_on(mut self, pattern: impl Into<String>) -> Self {
        self.cancel_on = Some(pattern.into());
        self
    }

    /// Every command seen so far, rendered as shell lines.
    pub fn commands(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Lines whose rendering contains `pattern`.
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    /// Programs that received secret stdin, in order.
    pub fn stdin_recipients(&self) -> Vec<String> {
        self.stdin_seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput> {
        let line = command.to_string();
        tracing::info!("dry-run: {}", line);

        if let Ok(mut journal) = self.journal.lock() {
            journal.push(line.clone());
        }
        if command.stdin.is_some() {
            if let Ok(mut seen) = self.stdin_seen.lock() {
                seen.push(command.program.clone());
            }
        }

        if self.cancel_on.as_deref().is_some_and(|p| line.contains(p)) {
            return Err(InstallError::Cancelled);
        }

        if let Some((_, code, stderr)) = self.failures.iter().find(|(p, _, _)| line.contains(p)) {
            return Ok(ToolOutput::failed(*code, stderr.clone()));
        }

        let stdout = self
            .responses
            .iter()
            .find(|(p, _)| line.contains(p))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(ToolOutput::ok(stdout))
    }
}
