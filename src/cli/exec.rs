//! `sandbox-claude exec` command implementation

use anyhow::{bail, Result};
use clap::Args;

use super::SelectorArgs;

#[derive(Args)]
pub struct ExecArgs {
    #[command(flatten)]
    selector: SelectorArgs,

    /// Command to run, after `--`
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

/// Exits with the command's own exit code.
pub fn run(args: ExecArgs) -> Result<i32> {
    if args.selector.all {
        bail!("exec needs a single sandbox; --all is not supported");
    }
    let selector = args.selector.to_selector(true)?;
    let mut manager = super::open_manager()?;

    let outcome = manager.exec(&selector, &args.command)?;
    if outcome.started {
        eprintln!("✓ Started sandbox: {}", outcome.record.identifier);
    }
    if outcome.exit_code != 0 {
        eprintln!("Command failed with exit code {}", outcome.exit_code);
    }
    Ok(outcome.exit_code)
}
