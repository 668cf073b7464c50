//! CLI command implementations

pub mod attach;
pub mod exec;
pub mod list;
pub mod new;
pub mod registry;
pub mod remove;
pub mod stop;
pub mod sync;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::{Config, Paths};
use crate::containers::{default_container_runtime, Docker};
use crate::manager::{LifecycleManager, Selector};
use crate::registry::Registry;

#[derive(Parser)]
#[command(name = "sandbox-claude")]
#[command(version, about = "Isolated Docker sandboxes for Claude development sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a sandbox for a project/feature, or reuse the latest one
    New(new::NewArgs),

    /// List tracked sandboxes
    #[command(alias = "ls")]
    List(list::ListArgs),

    /// Open an interactive shell in a sandbox
    #[command(alias = "ssh")]
    Attach(attach::AttachArgs),

    /// Run a command in a sandbox without a terminal
    Exec(exec::ExecArgs),

    /// Stop sandboxes
    Stop(stop::StopArgs),

    /// Remove sandboxes and their containers
    #[command(alias = "rm")]
    Remove(remove::RemoveArgs),

    /// Mark sandboxes whose containers vanished as removed
    Reconcile(registry::ReconcileArgs),

    /// Export the registry to a JSON file
    Export(registry::ExportArgs),

    /// Merge a previously exported registry
    Import(registry::ImportArgs),

    /// Delete old removed records
    Prune(registry::PruneArgs),

    /// Show registry statistics
    Stats(registry::StatsArgs),

    /// Credential synchronization (run inside a sandbox)
    Sync {
        #[command(subcommand)]
        command: sync::SyncCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which sandboxes a command applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectorArgs {
    /// Sandbox identifier or a unique prefix of one
    pub identifier: Option<String>,

    /// Select by project
    #[arg(short, long)]
    pub project: Option<String>,

    /// Select by feature
    #[arg(long)]
    pub feature: Option<String>,

    /// Only the most recently created match
    #[arg(short, long)]
    pub latest: bool,

    /// Every sandbox that is not removed
    #[arg(short, long, conflicts_with_all = ["identifier", "project", "feature", "latest"])]
    pub all: bool,
}

impl SelectorArgs {
    /// With `default_latest`, an empty selection means the newest sandbox.
    pub fn to_selector(&self, default_latest: bool) -> Result<Selector> {
        if self.all {
            return Ok(Selector::All);
        }
        if let Some(id) = &self.identifier {
            if self.project.is_some() || self.feature.is_some() || self.latest {
                bail!("An identifier cannot be combined with --project, --feature or --latest");
            }
            return Ok(Selector::identifier(id));
        }

        let project = self.project.as_deref();
        let feature = self.feature.as_deref();
        if self.latest || default_latest {
            return Ok(Selector::latest(project, feature));
        }
        if project.is_none() && feature.is_none() {
            bail!("Specify a sandbox identifier, --project/--feature, --latest or --all");
        }
        Ok(Selector::matching(project, feature))
    }
}

pub fn load_config() -> Result<(Config, Paths)> {
    let config = Config::load()?;
    let paths = Paths::resolve(&config)?;
    Ok((config, paths))
}

pub fn open_registry(paths: &Paths) -> Result<Registry> {
    if let Some(parent) = paths.registry.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Registry::open(&paths.registry)
        .with_context(|| format!("Failed to open registry {}", paths.registry.display()))
}

pub fn open_manager() -> Result<LifecycleManager<Docker>> {
    let (config, paths) = load_config()?;
    let registry = open_registry(&paths)?;
    Ok(LifecycleManager::new(
        registry,
        default_container_runtime(),
        config,
        paths,
    ))
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max <= 3 {
        s.chars().take(max).collect()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}

/// Coarse age like `5m`, `3h`, `2d`.
pub fn format_age(
    since: chrono::DateTime<chrono::Utc>,
    now: chrono::DateTime<chrono::Utc>,
) -> String {
    let secs = (now - since).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}
