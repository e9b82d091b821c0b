//! irspamd: classify IMAP mailboxes with rspamd
//!
//! Walks a mailbox over IMAP, asks rspamd for a verdict on each message, tags
//! it with a score-bucket keyword and moves spam (and optionally ham) to a
//! destination mailbox. The `learn` command feeds a mailbox to rspamd as ham
//! or spam. Every processed UID is recorded so later runs only touch new
//! mail.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and command dispatch
//! - [`cli`]: Command-line arguments
//! - [`config`]: Environment-driven settings and per-run configuration
//! - [`errors`]: Application error model and fatal/recoverable split
//! - [`engine`]: Run entry points and store/transport lifecycle
//! - [`pipeline`]: Per-message scan and learn loops
//! - [`transport`]: Mail transport capability and input validation
//! - [`imap`]: IMAP transport with timeout wrappers
//! - [`rspamd`]: Classifier capability with socket and `rspamc` backends
//! - [`parser`]: rspamd output parsing
//! - [`policy`]: Score buckets and move decisions
//! - [`store`]: SQLite-backed processing records
//! - [`models`]: Verdicts, records and run reports
//! - [`mime`]: Header extraction for log output
//! - [`shutdown`]: Stop requests from signals

mod cli;
mod config;
mod engine;
mod errors;
mod imap;
mod mime;
mod models;
mod parser;
mod pipeline;
mod policy;
mod rspamd;
mod shutdown;
mod store;
#[cfg(test)]
mod testing;
mod transport;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::Settings;
use errors::AppResult;
use models::RunReport;
use shutdown::Shutdown;

/// Application entry point
///
/// Logs go to stderr; `RUST_LOG` overrides the default `info` level.
///
/// # Example
///
/// ```no_run
/// IMAP_PASSWORD=secret irspamd -H imap.example.com -u alice scan -s Junk
/// IRSPAMD_CLASSIFIER=rspamc irspamd -H imap.example.com -u alice learn spam -l Junk
/// ```
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            tracing::info!(
                listed = report.listed,
                skipped = report.skipped,
                classified = report.classified,
                spam = report.spam,
                ham = report.ham,
                moved = report.moved,
                already_known = report.already_known,
                failed = report.failed,
                stopped = report.stopped,
                "run finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<RunReport> {
    let settings = Settings::load_from_env()?;
    let (shutdown, stop) = Shutdown::new();
    shutdown::install_signal_handlers(shutdown);

    match &cli.command {
        Command::Scan(args) => engine::run_scan(&settings, &cli.scan_config(args), &stop).await,
        Command::Learn(args) => engine::run_learn(&settings, &cli.learn_config(args), &stop).await,
    }
}
