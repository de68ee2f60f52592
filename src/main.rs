//! Task Assignment Engine
//!
//! HTTP server binding agents to tasks with optimistic concurrency,
//! idempotent retries and an append-only audit log.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Arc;
use task_assign::api;
use task_assign::cli::seed::{run_seed_agent, run_seed_task};
use task_assign::cli::{Cli, Command};
use task_assign::config::Config;
use task_assign::db::Database;
use task_assign::engine::AssignmentEngine;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging based on `--log` and `--verbose`. `RUST_LOG` wins when set.
fn init_logging(log: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    };

    match log {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

async fn serve(db: Arc<Database>, config: &Config) -> Result<()> {
    let engine = AssignmentEngine::new(db, config);
    let handle = api::start_server(engine, &config.server.host, config.server.port).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, stopping");
    handle.shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, cli.verbose)?;

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    // CLI flags override config and environment
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config.ensure_db_dir()?;
    let db = Arc::new(Database::open(&config.server.db_path)?);
    info!(db_path = %config.server.db_path.display(), "Database ready");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(db, &config).await?,
        Command::PurgeIdempotency => {
            let purged = db.purge_expired_idempotency_keys()?;
            println!("Purged {} expired idempotency record(s)", purged);
        }
        Command::SeedTask(args) => {
            let task = run_seed_task(&db, &args)?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::SeedAgent(args) => {
            let agent = run_seed_agent(&db, &args)?;
            println!("{}", serde_json::to_string_pretty(&agent)?);
        }
    }

    Ok(())
}
