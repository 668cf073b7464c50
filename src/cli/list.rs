//! `sandbox-claude list` command implementation

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::containers::short_ref;
use crate::manager::{Drift, ListedSandbox};
use crate::registry::{now, RecordFilter, SandboxRecord, SandboxStatus};

/// Minimum width; identifiers are printed in full.
const TABLE_COL_IDENTIFIER: usize = 64;
const TABLE_COL_PROJECT: usize = 16;
const TABLE_COL_FEATURE: usize = 16;
const TABLE_COL_STATUS: usize = 20;
const TABLE_COL_CONTAINER: usize = 12;

#[derive(Args)]
pub struct ListArgs {
    /// Filter by project
    #[arg(short, long)]
    project: Option<String>,

    /// Filter by feature
    #[arg(short, long)]
    feature: Option<String>,

    /// Show only running sandboxes
    #[arg(long, conflicts_with = "all")]
    active: bool,

    /// Include removed sandboxes
    #[arg(short, long)]
    all: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl ListArgs {
    fn filter(&self) -> RecordFilter {
        let filter = RecordFilter {
            project: self.project.clone(),
            feature: self.feature.clone(),
            ..RecordFilter::default()
        };
        if self.active {
            filter.statuses(&[SandboxStatus::Running])
        } else if self.all {
            filter
        } else {
            filter.active()
        }
    }
}

#[derive(Serialize)]
struct SandboxJson<'a> {
    #[serde(flatten)]
    record: &'a SandboxRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drift: Option<String>,
}

fn describe_drift(drift: &Drift) -> String {
    match drift {
        Drift::Vanished => "container missing".to_string(),
        Drift::Mismatch { observed } => format!("container {}", observed),
    }
}

fn status_cell(listed: &ListedSandbox) -> String {
    match &listed.drift {
        Some(Drift::Vanished) => format!("{} (gone)", listed.record.status),
        Some(Drift::Mismatch { observed }) => format!("{} ({})", listed.record.status, observed),
        None => listed.record.status.to_string(),
    }
}

fn print_table_header() {
    println!(
        "{:<w_id$} {:<w_project$} {:<w_feature$} {:<w_status$} {:<w_container$} AGE",
        "IDENTIFIER",
        "PROJECT",
        "FEATURE",
        "STATUS",
        "CONTAINER",
        w_id = TABLE_COL_IDENTIFIER,
        w_project = TABLE_COL_PROJECT,
        w_feature = TABLE_COL_FEATURE,
        w_status = TABLE_COL_STATUS,
        w_container = TABLE_COL_CONTAINER,
    );
    let width = TABLE_COL_IDENTIFIER
        + TABLE_COL_PROJECT
        + TABLE_COL_FEATURE
        + TABLE_COL_STATUS
        + TABLE_COL_CONTAINER
        + 9;
    println!("{}", "-".repeat(width));
}

fn table_row(listed: &ListedSandbox) -> String {
    let record = &listed.record;
    format!(
        "{:<w_id$} {:<w_project$} {:<w_feature$} {:<w_status$} {:<w_container$} {}",
        record.identifier,
        super::truncate(&record.project, TABLE_COL_PROJECT),
        super::truncate(&record.feature, TABLE_COL_FEATURE),
        super::truncate(&status_cell(listed), TABLE_COL_STATUS),
        short_ref(&record.container_ref),
        super::format_age(record.created_at, now()),
        w_id = TABLE_COL_IDENTIFIER,
        w_project = TABLE_COL_PROJECT,
        w_feature = TABLE_COL_FEATURE,
        w_status = TABLE_COL_STATUS,
        w_container = TABLE_COL_CONTAINER,
    )
}

pub fn run(args: ListArgs) -> Result<()> {
    let manager = super::open_manager()?;
    let listed = manager.list(&args.filter())?;

    if args.json {
        let sandboxes: Vec<SandboxJson> = listed
            .iter()
            .map(|l| SandboxJson {
                record: &l.record,
                observed: l.observed.as_ref().map(|s| s.describe()),
                drift: l.drift.as_ref().map(describe_drift),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sandboxes)?);
        return Ok(());
    }

    if listed.is_empty() {
        println!("No sandboxes found.");
        return Ok(());
    }

    print_table_header();
    for l in &listed {
        println!("{}", table_row(l));
    }
    println!("\nTotal: {} sandboxes", listed.len());

    let drifted = listed.iter().filter(|l| l.drift.is_some()).count();
    if drifted > 0 {
        println!(
            "{} sandbox(es) disagree with the runtime; run 'sandbox-claude reconcile' to update.",
            drifted
        );
    }

    Ok(())
}
