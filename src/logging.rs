//! Log setup
//!
//! Every event renders as one line:
//!
//! ```text
//! 2026-10-16 14:03:22 | INFO  | archsetup::pipeline::run:306 | [4/15] Format partitions
//! ```
//!
//! The origin names the function when the event fires inside a span opened
//! by `#[tracing::instrument]` in the same module; otherwise it is the module
//! path alone.
//!
//! Events on [`FATAL_TARGET`] render their level as `FATAL`. Use the
//! [`fatal!`](crate::fatal) macro, which also terminates the process.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Target whose events are rendered with level `FATAL`.
pub const FATAL_TARGET: &str = "archsetup::fatal";

/// Log an unrecoverable condition and exit with status 1.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::tracing::error!(target: $crate::logging::FATAL_TARGET, $($arg)+);
        $crate::logging::terminate()
    }};
}

/// Exit after a FATAL record has been written.
pub fn terminate() -> ! {
    std::process::exit(1)
}

/// `timestamp | LEVEL | module::function:line | message`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let level = if meta.target() == FATAL_TARGET {
            "FATAL".to_string()
        } else {
            meta.level().to_string()
        };
        let module = meta.module_path().unwrap_or_else(|| meta.target());
        let function = ctx.event_scope().and_then(|mut scope| {
            scope
                .find(|span| span.metadata().module_path() == Some(module))
                .map(|span| span.name())
        });

        write!(
            writer,
            "{} | {:<5} | {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            module
        )?;
        if let Some(function) = function {
            write!(writer, "::{}", function)?;
        }
        write!(writer, ":{} | ", meta.line().unwrap_or(0))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber.
///
/// The log file (appended, DEBUG and above) is the full record an operator
/// is pointed at on failure. stderr shows INFO and above unless `RUST_LOG`
/// says otherwise.
pub fn init(log_path: &Path) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("cannot open log file {}", log_path.display()))?;

    let file_layer = layer()
        .event_format(LineFormat)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::DEBUG);

    let stderr_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let stderr_layer = layer()
        .event_format(LineFormat)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("logger already initialized")?;
    Ok(())
}
