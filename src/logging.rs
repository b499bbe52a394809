//! Tracing subscribers for the server and the one-shot commands.
//!
//! `serve` with a logs directory writes JSON lines to a daily file and a
//! readable copy to stderr. Everything else logs compactly to stderr so stdout
//! stays free for command output. `RUST_LOG` overrides the configured level.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rotated server log.
pub const LOG_FILE_PREFIX: &str = "smsflow.log";

/// Keeps the background log writer alive. Dropping it flushes the file.
pub struct LoggingGuard {
    _writer: WorkerGuard,
}

/// `RUST_LOG` if set, else `level`, else `info`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the server subscriber writing `{logs_dir}/smsflow.log.YYYY-MM-DD`.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a global subscriber
/// is already installed.
pub fn init_production(logs_dir: &Path, level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("global tracing subscriber already installed")?;

    Ok(LoggingGuard { _writer: guard })
}

/// Install a compact stderr-only subscriber. A no-op if one is already set.
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}
