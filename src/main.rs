//! smsflow CLI entry point.
//!
//! Provides `serve`, `migrate`, `dispatch` and `dead-letters` subcommands for
//! running the ingest server, preparing the database, replaying recorded
//! events, and inspecting undecodable events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use smsflow::app::App;
use smsflow::config::SmsflowConfig;
use smsflow::events::EventEnvelope;
use smsflow::scheduler::HttpTaskScheduler;
use smsflow::{logging, server, store};

/// smsflow: SMS message lifecycle tracking.
#[derive(Parser)]
#[command(name = "smsflow", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the event ingest server.
    Serve,
    /// Create or upgrade the database schema and exit.
    Migrate,
    /// Dispatch newline-delimited event envelopes from a file.
    Dispatch {
        /// File with one JSON envelope per line.
        file: PathBuf,
    },
    /// Print the most recent undecodable events as JSON lines.
    DeadLetters {
        /// Maximum number of entries.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SmsflowConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Serve => handle_serve(config).await,
        Command::Migrate => handle_migrate(&config).await,
        Command::Dispatch { file } => handle_dispatch(&config, &file).await,
        Command::DeadLetters { limit } => handle_dead_letters(&config, limit).await,
    }
}

/// Run the ingest server until Ctrl-C.
async fn handle_serve(config: SmsflowConfig) -> anyhow::Result<()> {
    let _logging_guard = match &config.logging.logs_dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };

    let (app, _scheduler) = build_app(&config).await?;
    let app = Arc::new(app);
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind ingest server on {}", config.server.bind))?;

    info!(
        database = %config.database.path.display(),
        scheduler_endpoint = %config.scheduler.endpoint,
        auth = config.server.auth_token.is_some(),
        "smsflow starting"
    );

    let router = server::build_router(app, config.server.auth_token.clone());
    server::serve(listener, router).await
}

/// Apply the schema and exit.
async fn handle_migrate(config: &SmsflowConfig) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);
    let pool = store::open(&config.database.path).await?;
    pool.close().await;
    info!(path = %config.database.path.display(), "database schema is up to date");
    Ok(())
}

/// Replay envelopes from `file`, printing one report per envelope.
async fn handle_dispatch(config: &SmsflowConfig, file: &Path) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);
    let (app, scheduler) = build_app(config).await?;

    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let mut lines = BufReader::new(handle).lines();

    let mut line_no: usize = 0;
    let mut failed: usize = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("failed to read {}", file.display()))?
    {
        line_no = line_no.saturating_add(1);
        if line.trim().is_empty() {
            continue;
        }
        let envelope: EventEnvelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed envelope");
                failed = failed.saturating_add(1);
                continue;
            }
        };

        let report = app.ingest(&envelope).await?;
        if !report.is_success() {
            failed = failed.saturating_add(1);
        }
        println!("{}", serde_json::to_string(&report.summary())?);
    }

    let pending = scheduler.pending();
    if !pending.is_empty() {
        warn!(
            tasks = pending.len(),
            "exiting with unfired expiration checks; they will not run"
        );
    }
    info!(lines = line_no, failed, "dispatch finished");
    if failed > 0 {
        anyhow::bail!("{failed} envelope(s) failed");
    }
    Ok(())
}

/// Print recent dead letters.
async fn handle_dead_letters(config: &SmsflowConfig, limit: u32) -> anyhow::Result<()> {
    logging::init_cli(&config.logging.level);
    let pool = store::open(&config.database.path).await?;
    let letters = store::DeadLetterStore::new(pool).recent(limit).await?;
    for letter in letters {
        println!("{}", serde_json::to_string(&letter)?);
    }
    Ok(())
}

async fn build_app(config: &SmsflowConfig) -> anyhow::Result<(App, Arc<HttpTaskScheduler>)> {
    let pool = store::open(&config.database.path).await?;
    let scheduler = Arc::new(HttpTaskScheduler::new(Duration::from_secs(
        config.scheduler.timeout_secs,
    )));
    let app = App::new(pool, scheduler.clone(), config.expiration_target());
    Ok((app, scheduler))
}
