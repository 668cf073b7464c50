//! `sandbox-claude stop` command implementation

use anyhow::Result;
use clap::Args;

use super::SelectorArgs;
use crate::manager::StopOutcome;

#[derive(Args)]
pub struct StopArgs {
    #[command(flatten)]
    selector: SelectorArgs,
}

pub fn run(args: StopArgs) -> Result<i32> {
    let selector = args.selector.to_selector(false)?;
    let mut manager = super::open_manager()?;

    let outcomes = manager.stop(&selector)?;
    if outcomes.is_empty() {
        println!("No running sandboxes to stop.");
        return Ok(0);
    }

    let mut failed = 0;
    for (record, outcome) in &outcomes {
        match outcome {
            StopOutcome::Stopped => println!("✓ Stopped: {}", record.identifier),
            StopOutcome::AlreadyGone => {
                println!("✓ Stopped: {} (container already gone)", record.identifier)
            }
            StopOutcome::Failed(reason) => {
                failed += 1;
                eprintln!("✗ {}: {}", record.identifier, reason);
            }
        }
    }

    Ok(if failed > 0 { 1 } else { 0 })
}
