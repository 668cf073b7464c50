//! `sandbox-claude remove` command implementation

use anyhow::Result;
use clap::Args;

use super::SelectorArgs;
use crate::manager::RemoveOutcome;

#[derive(Args)]
pub struct RemoveArgs {
    #[command(flatten)]
    selector: SelectorArgs,

    /// Remove running containers without stopping them first
    #[arg(short, long)]
    force: bool,
}

pub fn run(args: RemoveArgs) -> Result<i32> {
    let selector = args.selector.to_selector(false)?;
    let mut manager = super::open_manager()?;

    let outcomes = manager.remove(&selector, args.force)?;
    if outcomes.is_empty() {
        println!("No sandboxes to remove.");
        return Ok(0);
    }

    let mut failed = 0;
    for (record, outcome) in &outcomes {
        match outcome {
            RemoveOutcome::Removed => println!("✓ Removed: {}", record.identifier),
            RemoveOutcome::AlreadyRemoved => {
                println!("  {} was already removed", record.identifier)
            }
            RemoveOutcome::Failed(reason) => {
                failed += 1;
                eprintln!("✗ {}: {}", record.identifier, reason);
            }
        }
    }

    if failed > 0 && !args.force {
        eprintln!("Retry with --force to remove running containers.");
    }
    Ok(if failed > 0 { 1 } else { 0 })
}
