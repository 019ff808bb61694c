//! Structured Logger
//!
//! Wraps `tracing` to provide a human console layer, a JSON (NDJSON) file
//! layer with daily rotation, and `RUST_LOG`-based level control.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where human-readable log lines go in addition to the JSON file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutput {
    Stdout,
    /// Interactive front-ends keep stdout for the conversation.
    Stderr,
    Off,
}

/// Initialize the global structured logger.
///
/// `RUST_LOG` overrides `level`. The returned guard flushes the file writer
/// on drop and must be held for the lifetime of the process.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str, console: ConsoleOutput) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Rolling file appender: writes NDJSON to `logs/confab.log.YYYY-MM-DD`
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "confab.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false);

    let console_layer = match console {
        ConsoleOutput::Off => None,
        ConsoleOutput::Stdout => Some(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_ansi(true)
                .boxed(),
        ),
        ConsoleOutput::Stderr => Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false)
                .boxed(),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}
