//! `sandbox-claude new` command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::manager::{CreateOptions, Selector};
use crate::registry::ConfigMode;

#[derive(Args)]
pub struct NewArgs {
    /// Project the sandbox belongs to
    #[arg(short, long)]
    project: String,

    /// Feature or task being worked on
    #[arg(short, long)]
    feature: String,

    /// Reuse the latest sandbox for this project/feature if one exists
    #[arg(short, long)]
    reuse: bool,

    /// Create without attaching
    #[arg(short, long)]
    detach: bool,

    /// Image to run (defaults to the configured image)
    #[arg(long)]
    image: Option<String>,

    /// How credentials reach the container: mounted, workspace or none
    #[arg(long)]
    config_mode: Option<ConfigMode>,

    /// Directory mounted at /workspace (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE (repeatable)
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// CPU limit passed to the runtime (e.g. 2 or 1.5)
    #[arg(long)]
    cpus: Option<String>,

    /// Memory limit passed to the runtime (e.g. 4g)
    #[arg(long)]
    memory: Option<String>,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

pub fn run(args: NewArgs) -> Result<i32> {
    let mut manager = super::open_manager()?;

    let workspace = match args.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let options = CreateOptions {
        reuse: args.reuse,
        image: args.image,
        config_mode: args.config_mode,
        workspace,
        environment: args.env,
        cpu_limit: args.cpus,
        memory_limit: args.memory,
    };

    let outcome = manager.create_or_reuse(&args.project, &args.feature, options)?;
    let record = &outcome.record;

    if outcome.reused {
        println!("✓ Reusing sandbox: {}", record.identifier);
    } else {
        println!("✓ Created sandbox: {}", record.identifier);
        println!("  Image:  {}", record.image_ref);
        println!("  Config: {}", record.config_mode);
        if let Some(staged) = &outcome.staged {
            match &staged.source {
                Some(source) => println!(
                    "  Staged {} credential file(s) from {}",
                    staged.files.len(),
                    source
                ),
                None => println!("  No host credentials found; log in inside the sandbox"),
            }
        }
    }

    if args.detach {
        println!();
        println!("Attach with: sandbox-claude attach {}", record.identifier);
        return Ok(0);
    }

    let identifier = record.identifier.clone();
    super::attach::attach_interactive(&mut manager, &Selector::identifier(&identifier))
}
