//! Top-level error capture and guaranteed cleanup.
//!
//! [`Recovery`] lives for the whole `install` run. Every escalated error is
//! offered to [`Recovery::on_error`]; only the first one is kept as the
//! diagnostic. [`Recovery::finish`] runs exactly once at the end, consumes
//! the diagnostic, scrubs secrets, removes the working directory and
//! returns the [`Outcome`] the process exits with. If `finish` is never
//! reached (early return, panic unwinding) the `Drop` impl still removes the
//! working directory. A forced exit on a repeated signal skips both; the
//! working directory is registered with the process guard's
//! [`CleanupRegistry`] for that path.

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config_store::ConfigRecord;
use crate::error::{InstallError, Result, SourceLocation};
use crate::process_guard::CleanupRegistry;

/// The first failure of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What failed, as reported by the error.
    pub operation: String,
    /// The stage or step that was running.
    pub context: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.context, self.operation)?;
        if let Some(location) = &self.location {
            write!(f, " [{location}]")?;
        }
        Ok(())
    }
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Cancelled,
    Failed {
        code: i32,
        diagnostic: Option<Diagnostic>,
        message: String,
        log_path: PathBuf,
    },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Cancelled => 130,
            Self::Failed { code, .. } => *code,
        }
    }

    /// Operator-facing summary printed just before exiting.
    pub fn report(&self) -> String {
        match self {
            Self::Success => "Installation complete. You can reboot into the new system.".to_string(),
            Self::Cancelled => "Installation cancelled.".to_string(),
            Self::Failed {
                diagnostic,
                message,
                log_path,
                ..
            } => {
                let head = diagnostic
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| message.clone());
                format!("{head}\nSee the full log at {}", log_path.display())
            }
        }
    }
}

pub struct Recovery {
    diagnostic: Option<Diagnostic>,
    work_path: PathBuf,
    work_dir: Option<TempDir>,
    log_path: PathBuf,
    finished: bool,
}

impl Recovery {
    /// Create the transient working directory.
    pub fn new(log_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let work_dir = tempfile::Builder::new().prefix("archsetup-").tempdir()?;
        tracing::debug!("Working directory {}", work_dir.path().display());
        if let Ok(mut cleanup) = CleanupRegistry::global().lock() {
            cleanup.register_dir(work_dir.path());
        }
        Ok(Self {
            diagnostic: None,
            work_path: work_dir.path().to_path_buf(),
            work_dir: Some(work_dir),
            log_path: log_path.into(),
            finished: false,
        })
    }

    /// Transient working directory (key files, dry-run target root).
    pub fn work_dir(&self) -> &Path {
        &self.work_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Record `err` as the diagnostic unless one is already held.
    ///
    /// Cancellation is not a failure and is never recorded.
    pub fn on_error(&mut self, context: &str, err: &InstallError) {
        if err.is_cancellation() {
            tracing::debug!("{} interrupted by cancellation", context);
            return;
        }
        if self.diagnostic.is_some() {
            tracing::debug!("Keeping first diagnostic, ignoring: {}", err);
            return;
        }
        let diagnostic = Diagnostic {
            operation: err.to_string(),
            context: context.to_string(),
            location: err.location().cloned(),
        };
        tracing::error!("{}", diagnostic);
        self.diagnostic = Some(diagnostic);
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    /// Close out the run: consume the diagnostic, scrub secrets, remove the
    /// working directory, and map `result` to the exit outcome.
    pub fn finish(&mut self, record: &mut ConfigRecord, result: Result<()>) -> Outcome {
        if self.finished {
            tracing::warn!("Recovery already finished");
        }
        self.finished = true;

        if let Err(err) = &result {
            self.on_error("installation", err);
        }
        let diagnostic = self.diagnostic.take();

        record.scrub_secrets();
        self.remove_work_dir();

        let outcome = match result {
            Ok(()) => Outcome::Success,
            Err(err) if err.is_cancellation() => Outcome::Cancelled,
            Err(err) => Outcome::Failed {
                code: err.exit_code(),
                diagnostic,
                message: err.to_string(),
                log_path: self.log_path.clone(),
            },
        };

        match &outcome {
            Outcome::Success => tracing::info!("Installation finished successfully"),
            Outcome::Cancelled => tracing::warn!("Installation cancelled by operator"),
            Outcome::Failed { code, .. } => {
                tracing::error!("Installation failed (exit status {})", code)
            }
        }
        outcome
    }

    fn remove_work_dir(&mut self) {
        if let Some(dir) = self.work_dir.take() {
            let path = dir.path().to_path_buf();
            if let Ok(mut cleanup) = CleanupRegistry::global().lock() {
                cleanup.unregister_dir(&path);
            }
            match dir.close() {
                Ok(()) => tracing::debug!("Removed {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for Recovery {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("Recovery dropped before finish, cleaning up");
        }
        self.remove_work_dir();
    }
}
