//! Seed subcommands: insert task and agent rows for local testing.
//!
//! Tasks and agents are owned by other features in production; these exist so
//! the engine can be exercised against a fresh database.

use anyhow::{Result, anyhow};
use clap::Args;

use crate::db::Database;
use crate::types::{Agent, Task, TaskStatus};

/// Arguments for the seed-task subcommand
#[derive(Args, Debug)]
pub struct SeedTaskArgs {
    /// Task ID
    pub id: String,

    /// Title (defaults to the id)
    #[arg(long)]
    pub title: Option<String>,

    /// Lifecycle status, e.g. TO_DO, IN_PROGRESS, DONE
    #[arg(long, default_value = "TO_DO")]
    pub status: String,
}

/// Arguments for the seed-agent subcommand
#[derive(Args, Debug)]
pub struct SeedAgentArgs {
    /// Agent ID
    pub id: String,

    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Role label
    #[arg(long)]
    pub role: Option<String>,

    /// Agent status; only "active" agents accept assignments
    #[arg(long, default_value = "active")]
    pub status: String,
}

/// Insert the task described by `args`.
pub fn run_seed_task(db: &Database, args: &SeedTaskArgs) -> Result<Task> {
    let status = TaskStatus::from_str(&args.status.to_ascii_uppercase())
        .ok_or_else(|| anyhow!("Unknown task status '{}'", args.status))?;
    let title = args.title.clone().unwrap_or_else(|| args.id.clone());
    db.create_task(Some(args.id.clone()), &title, status)
}

/// Insert the agent described by `args`.
pub fn run_seed_agent(db: &Database, args: &SeedAgentArgs) -> Result<Agent> {
    db.register_agent(
        Some(args.id.clone()),
        args.name.clone(),
        args.role.clone(),
        &args.status,
    )
}
