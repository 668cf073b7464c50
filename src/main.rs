//! Sandbox Claude - isolated Docker sandboxes for Claude development sessions

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use sandbox_claude::cli::{self, Cli, Commands};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = if std::env::var("SANDBOX_CLAUDE_DEBUG").is_ok() {
        EnvFilter::new("sandbox_claude=debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Completion { shell } => {
            generate(
                shell,
                &mut Cli::command(),
                "sandbox-claude",
                &mut std::io::stdout(),
            );
            0
        }
        Commands::New(args) => cli::new::run(args)?,
        Commands::List(args) => cli::list::run(args).map(|_| 0)?,
        Commands::Attach(args) => cli::attach::run(args)?,
        Commands::Exec(args) => cli::exec::run(args)?,
        Commands::Stop(args) => cli::stop::run(args)?,
        Commands::Remove(args) => cli::remove::run(args)?,
        Commands::Reconcile(args) => cli::registry::run_reconcile(args).map(|_| 0)?,
        Commands::Export(args) => cli::registry::run_export(args).map(|_| 0)?,
        Commands::Import(args) => cli::registry::run_import(args).map(|_| 0)?,
        Commands::Prune(args) => cli::registry::run_prune(args).map(|_| 0)?,
        Commands::Stats(args) => cli::registry::run_stats(args).map(|_| 0)?,
        Commands::Sync { command } => cli::sync::run(command).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
