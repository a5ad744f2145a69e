//! # recon-worker
//!
//! Worker agent of a distributed reconnaissance platform. It subscribes to
//! task topics, runs their tasks at a fixed concurrency and reports its
//! status to the coordinator.
//!
//! ## Usage
//!
//! ```bash
//! # Serve every built-in topic with 3 parallel tasks per topic
//! recon-worker
//!
//! # Fingerprint and passive tasks only, high performance tier
//! recon-worker -m 2,3 -p 1 -c 8
//!
//! # Tasks of two workspaces
//! recon-worker -m 5 -w <workspace-id>,<workspace-id>
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use recon_worker::commands::work::WorkCommand;
use recon_worker::options::WorkerOptions;

/// Exit status for invalid startup options
const EXIT_INVALID_OPTIONS: i32 = 2;

/// recon-worker - task worker of the reconnaissance platform
#[derive(Parser)]
#[command(
    name = "recon-worker",
    about = "Worker agent pulling and executing reconnaissance tasks",
    version
)]
struct Cli {
    #[command(flatten)]
    options: WorkerOptions,
}

/// Operator log on stderr, plus a diagnostic log file when requested
fn init_tracing(runtime_log: Option<&Path>) -> Result<()> {
    let operator = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "recon_worker=info".into()),
        );

    let diagnostic = match runtime_log {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {parent:?}"))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open runtime log {path:?}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(Arc::new(file))
                    .with_filter(EnvFilter::new("recon_worker=debug")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(operator)
        .with(diagnostic)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.options.runtime_log.as_deref()) {
        eprintln!("{e:#}");
        std::process::exit(EXIT_INVALID_OPTIONS);
    }

    let command = match WorkCommand::new(cli.options) {
        Ok(command) => command,
        Err(e) => {
            error!("Invalid worker options: {}", e);
            std::process::exit(EXIT_INVALID_OPTIONS);
        }
    };

    match command.execute().await {
        Ok(()) => {
            info!("👋 Worker exited.");
            std::process::exit(0);
        }
        Err(e) => {
            error!("Worker failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
