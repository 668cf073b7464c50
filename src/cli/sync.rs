//! `sandbox-claude sync` subcommands, run inside a sandbox

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::warn;

use crate::config::Config;
use crate::sync::{self, ContainerLayout, CredentialBundle, SyncEngine};

/// Exit code for a push that reached some destinations but not all.
pub const EXIT_PARTIAL: i32 = 2;

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Place credentials from the highest-priority source into $HOME
    Pull,

    /// Write the live credentials back to the shared directory and workspace backup
    Push,

    /// Pull, run a command, and push when it exits or is interrupted
    Run(RunArgs),

    /// Validate a credential bundle
    Check(CheckArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Command to supervise
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Bundle root to check (defaults to $HOME)
    #[arg(long)]
    dir: Option<PathBuf>,
}

/// Inside a container the config file is usually absent; defaults apply.
fn bundle() -> CredentialBundle {
    bundle_from(Config::load())
}

/// A broken config must not block syncing credentials, but a user who
/// configured auxiliary files should learn they were ignored.
fn bundle_from(config: Result<Config>) -> CredentialBundle {
    let config = config.unwrap_or_else(|e| {
        warn!("Ignoring unreadable config, using defaults: {:#}", e);
        Config::default()
    });
    CredentialBundle::with_auxiliary(&config.sync.auxiliary_files)
}

fn container_engine() -> SyncEngine {
    SyncEngine::for_container(bundle(), &ContainerLayout::detect())
}

pub async fn run(command: SyncCommands) -> Result<i32> {
    match command {
        SyncCommands::Pull => pull(),
        SyncCommands::Push => push(),
        SyncCommands::Run(args) => supervise(args).await,
        SyncCommands::Check(args) => check(args),
    }
}

fn pull() -> Result<i32> {
    let engine = container_engine();
    let result = engine.pull()?;
    for file in &result.resolved {
        println!("✓ {} from {}", file.name, file.source);
    }
    for name in &result.synthesized {
        println!("✓ {} created empty", name);
    }
    for name in &result.missing {
        println!("  {} not found in any source", name);
    }
    println!("{}", result.summary());
    Ok(0)
}

fn push() -> Result<i32> {
    let engine = container_engine();
    let result = engine.push();
    for warning in &result.warnings {
        println!("  {}", warning);
    }
    for dest in &result.destinations {
        match &dest.outcome {
            sync::DestinationOutcome::Written(n) => {
                println!("✓ {}: {} file(s) -> {}", dest.name, n, dest.path.display())
            }
            sync::DestinationOutcome::Skipped(reason) => {
                println!("  {}: skipped ({})", dest.name, reason)
            }
            sync::DestinationOutcome::Failed(reason) => {
                eprintln!("✗ {}: {}", dest.name, reason)
            }
        }
    }
    let failed = result
        .destinations
        .iter()
        .any(|d| matches!(d.outcome, sync::DestinationOutcome::Failed(_)));
    if failed && result.is_partial() {
        eprintln!("Push only partially succeeded");
        return Ok(EXIT_PARTIAL);
    }
    if result.succeeded() == 0 && result.warnings.is_empty() {
        return Ok(1);
    }
    Ok(0)
}

async fn supervise(args: RunArgs) -> Result<i32> {
    let engine = Arc::new(container_engine());
    Ok(sync::run_supervised(engine, &args.command).await?)
}

fn check(args: CheckArgs) -> Result<i32> {
    let bundle = bundle();
    let root = args
        .dir
        .unwrap_or_else(|| ContainerLayout::detect().target_home);

    let report = sync::validate(&bundle, &root);
    for file in bundle.present_in(&root) {
        println!("✓ {} ({})", file.name, file.path_in(&root).display());
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    for error in &report.errors {
        eprintln!("✗ {}", error);
    }
    Ok(if report.is_valid() { 0 } else { 1 })
}
