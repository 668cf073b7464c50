//! Registry maintenance commands: reconcile, export, import, prune, stats

use std::path::PathBuf;

use anyhow::Result;
use chrono::Duration;
use clap::Args;
use serde::Serialize;

use crate::registry::{now, SandboxStatus};

#[derive(Args)]
pub struct ReconcileArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Destination file
    path: PathBuf,
}

#[derive(Args)]
pub struct ImportArgs {
    /// File produced by `sandbox-claude export`
    path: PathBuf,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Delete removed records not seen for this many days (defaults to the configured value)
    #[arg(long)]
    days: Option<u32>,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct StatsJson {
    total: usize,
    by_status: Vec<(String, usize)>,
    by_project: Vec<(String, usize)>,
}

pub fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    let mut manager = super::open_manager()?;
    let report = manager.reconcile()?;

    if args.json {
        let value = serde_json::json!({
            "checked": report.checked,
            "removed": report.removed,
            "orphans": report.orphans,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Checked {} sandbox(es).", report.checked);
    for identifier in &report.removed {
        println!("✓ Marked removed: {}", identifier);
    }
    if !report.orphans.is_empty() {
        println!(
            "{} labelled container(s) are not tracked by the registry:",
            report.orphans.len()
        );
        for orphan in &report.orphans {
            println!("  {}", crate::containers::short_ref(orphan));
        }
    }
    Ok(())
}

pub fn run_export(args: ExportArgs) -> Result<()> {
    let (_, paths) = super::load_config()?;
    let registry = super::open_registry(&paths)?;
    let count = registry.export(&args.path)?;
    println!("✓ Exported {} record(s) to {}", count, args.path.display());
    Ok(())
}

pub fn run_import(args: ImportArgs) -> Result<()> {
    let (_, paths) = super::load_config()?;
    let mut registry = super::open_registry(&paths)?;
    let report = registry.import(&args.path)?;

    println!(
        "✓ Imported {}: {} new, {} updated, {} unchanged",
        args.path.display(),
        report.inserted,
        report.updated,
        report.unchanged
    );
    for conflict in &report.conflicts {
        eprintln!(
            "  Skipped {}: container already tracked by another sandbox",
            conflict
        );
    }
    for rejected in &report.rejected {
        eprintln!("  Skipped {}: invalid project or feature name", rejected);
    }
    Ok(())
}

pub fn run_prune(args: PruneArgs) -> Result<()> {
    let (config, paths) = super::load_config()?;
    let mut registry = super::open_registry(&paths)?;

    let days = args.days.unwrap_or(config.registry.prune_after_days);
    let cutoff = now() - Duration::days(i64::from(days));
    let deleted = registry.prune(cutoff)?;
    println!(
        "✓ Pruned {} removed record(s) older than {} day(s)",
        deleted, days
    );
    Ok(())
}

pub fn run_stats(args: StatsArgs) -> Result<()> {
    let (_, paths) = super::load_config()?;
    let registry = super::open_registry(&paths)?;
    let stats = registry.statistics()?;

    if args.json {
        let json = StatsJson {
            total: stats.total,
            by_status: stats
                .by_status
                .iter()
                .map(|(s, n)| (s.to_string(), *n))
                .collect(),
            by_project: stats.by_project.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("Registry: {}", paths.registry.display());
    println!("Total sandboxes: {}", stats.total);
    for status in SandboxStatus::ALL {
        println!("  {:<8} {}", status.as_str(), stats.count(status));
    }
    if !stats.by_project.is_empty() {
        println!("\nBy project:");
        for (project, count) in &stats.by_project {
            println!("  {:<24} {}", project, count);
        }
    }
    Ok(())
}
