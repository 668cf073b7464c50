//! `sandbox-claude attach` command implementation

use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Args;

use super::SelectorArgs;
use crate::containers::ContainerRuntimeInterface;
use crate::manager::{LifecycleManager, Selector};

#[derive(Args)]
pub struct AttachArgs {
    #[command(flatten)]
    selector: SelectorArgs,

    /// Print the shell command instead of running it
    #[arg(long)]
    print: bool,
}

pub fn run(args: AttachArgs) -> Result<i32> {
    if args.selector.all {
        bail!("attach needs a single sandbox; --all is not supported");
    }
    let selector = args.selector.to_selector(true)?;
    let mut manager = super::open_manager()?;

    if args.print {
        let target = manager.attach(&selector)?;
        println!("{}", target.command.join(" "));
        return Ok(0);
    }
    attach_interactive(&mut manager, &selector)
}

/// Resolve, start if needed, then hand the terminal to the container shell.
pub fn attach_interactive<R: ContainerRuntimeInterface>(
    manager: &mut LifecycleManager<R>,
    selector: &Selector,
) -> Result<i32> {
    let target = manager.attach(selector)?;
    if target.started {
        println!("✓ Started sandbox: {}", target.record.identifier);
    }
    println!("Attaching to {}...", target.record.identifier);

    let Some((program, rest)) = target.command.split_first() else {
        bail!("Runtime produced an empty attach command");
    };
    let status = Command::new(program)
        .args(rest)
        .status()
        .with_context(|| format!("Failed to run {}", program))?;
    Ok(status.code().unwrap_or(1))
}
