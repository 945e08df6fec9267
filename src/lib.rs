pub mod deadlines;
pub mod engine;
pub mod errors;
pub mod fields;
pub mod models;
pub mod server;
pub mod settings;
pub mod store;

pub use crate::engine::Tracker;
pub use crate::errors::{AppError, AppResult};
pub use crate::settings::Settings;
pub use crate::store::{DocumentStore, FsStore, MemoryStore};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Tacheles defect tracker
#[derive(Debug, Parser)]
#[command(name = "tacheles", version)]
#[command(about = "Validated updates to the Tacheles defect list")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON API over the defect document
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Port to listen on
        #[arg(long, env = "TACHELES_PORT")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long, env = "TACHELES_BIND")]
        bind: Option<String>,
    },

    /// Check every record's deadline ordering and list violations
    Check {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Directory holding the defect document
    #[arg(long, env = "TACHELES_ROOT")]
    pub root: Option<PathBuf>,

    /// Optional settings file (YAML)
    #[arg(long, env = "TACHELES_CONFIG")]
    pub config: Option<PathBuf>,
}

impl CommonArgs {
    fn settings(&self) -> AppResult<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(root) = &self.root {
            settings.root = root.clone();
        }
        Ok(settings)
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Serve { common, port, bind } => {
            let mut settings = common.settings()?;
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            init_tracing(&settings.log_path(), &settings.log_filter)?;
            serve(settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { common } => {
            let settings = common.settings()?;
            init_tracing(&settings.log_path(), &settings.log_filter)?;
            check(&settings)
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let addr = settings.socket_addr()?;
    let store = settings
        .open_store()
        .with_context(|| format!("cannot serve {}", settings.document_path().display()))?;
    tracing::info!(
        document = %store.path().to_string_lossy(),
        versions = %store.versions_dir().to_string_lossy(),
        "document store opened"
    );
    let tracker = Arc::new(Tracker::new(store));
    server::serve(Arc::clone(&tracker), addr).await?;

    match Arc::try_unwrap(tracker) {
        Ok(tracker) => tracker.close()?.close(),
        Err(_) => tracing::warn!("document store still shared at shutdown"),
    }
    Ok(())
}

fn check(settings: &Settings) -> anyhow::Result<ExitCode> {
    let store = settings
        .open_store()
        .with_context(|| format!("cannot check {}", settings.document_path().display()))?;
    let tracker = Tracker::new(store);
    let violations = tracker.audit()?;
    tracker.close()?.close();

    if violations.is_empty() {
        println!("all records consistent");
        return Ok(ExitCode::SUCCESS);
    }
    for violation in &violations {
        println!("{}: {}", violation.record_id, violation.reason);
    }
    tracing::warn!(count = violations.len(), "deadline violations found");
    Ok(ExitCode::FAILURE)
}

fn init_tracing(log_dir: &Path, filter: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tacheles.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error.to_string()))
}
