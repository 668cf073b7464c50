//! Configuration synchronization engine
//!
//! The host half stages a credential bundle before a container is created;
//! the container half resolves the bundle at startup (`pull`) and copies it
//! back out before exit (`push`). Every copy goes through an atomic write with
//! the file's permission mode applied before the rename.

pub mod bundle;
mod engine;
pub mod fsutil;
mod hook;
pub mod source;
mod stage;
mod supervisor;
mod validate;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use bundle::{BundleFile, CredentialBundle, FileKind};
pub use engine::SyncEngine;
pub use hook::ShutdownHook;
pub use source::{CredentialSource, DirectorySource, FileMountSource, MemorySource};
pub use stage::{host_sources, stage, StageResult, LEGACY_HOST_CREDENTIALS};
pub use supervisor::{push_on_shutdown, run_supervised};
pub use validate::{validate, ValidationReport};

/// Where the shared host directory is mounted inside a container (read-write).
pub const CONTAINER_SHARED_MOUNT: &str = "/host-claude-config";
/// Where the per-sandbox staged bundle is mounted (read-only).
pub const CONTAINER_STAGED_MOUNT: &str = "/tmp/.claude-staged";
pub const CONTAINER_WORKSPACE: &str = "/workspace";
/// Workspace backup location, relative to the workspace root.
pub const WORKSPACE_BACKUP_DIR: &str = ".sandbox_claude/config";
pub const LEGACY_PRIMARY_CONFIG_MOUNT: &str = "/tmp/.claude.json.host";
pub const LEGACY_CREDENTIALS_MOUNT: &str = "/tmp/.claude_creds.json.host";

/// Overrides the in-container workspace root.
pub const WORKSPACE_ENV: &str = "SANDBOX_WORKSPACE";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No command given to run")]
    EmptyCommand,

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn write(path: &Path, source: std::io::Error) -> Self {
        SyncError::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Soft conditions reported alongside a result, never as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWarning {
    /// The target root holds no bundle files.
    NothingToSync,
    /// Files existed but no destination accepted them.
    NoDestination,
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncWarning::NothingToSync => f.write_str("nothing to sync"),
            SyncWarning::NoDestination => f.write_str("no destination was written"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOutcome {
    Written(usize),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationReport {
    pub name: String,
    pub path: PathBuf,
    pub outcome: DestinationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushResult {
    pub destinations: Vec<DestinationReport>,
    pub warnings: Vec<SyncWarning>,
}

impl PushResult {
    pub fn succeeded(&self) -> usize {
        self.destinations
            .iter()
            .filter(|d| matches!(d.outcome, DestinationOutcome::Written(_)))
            .count()
    }

    /// Some destinations were written and some were not.
    pub fn is_partial(&self) -> bool {
        let ok = self.succeeded();
        ok > 0 && ok < self.destinations.len()
    }

    pub fn summary(&self) -> String {
        if let Some(w) = self.warnings.first() {
            if self.destinations.is_empty() {
                return w.to_string();
            }
        }
        let parts: Vec<String> = self
            .destinations
            .iter()
            .map(|d| match &d.outcome {
                DestinationOutcome::Written(n) => format!("{}: {} file(s)", d.name, n),
                DestinationOutcome::Skipped(why) => format!("{}: skipped ({})", d.name, why),
                DestinationOutcome::Failed(why) => format!("{}: failed ({})", d.name, why),
            })
            .collect();
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub name: String,
    pub source: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResult {
    pub resolved: Vec<ResolvedFile>,
    /// Files created with default content because no source had them.
    pub synthesized: Vec<String>,
    pub missing: Vec<String>,
}

impl PullResult {
    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.resolved
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.source.as_str())
    }

    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .resolved
            .iter()
            .map(|r| format!("{} from {}", r.name, r.source))
            .collect();
        parts.extend(self.synthesized.iter().map(|n| format!("{} created", n)));
        if parts.is_empty() {
            "no bundle files found".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// In-container locations the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Bundle root the contained tool reads from.
    pub target_home: PathBuf,
    pub shared_mount: PathBuf,
    pub staged_mount: PathBuf,
    pub legacy_primary_config: PathBuf,
    pub legacy_credentials: PathBuf,
    pub backup_dir: PathBuf,
}

impl ContainerLayout {
    /// Layout for the running container: `$HOME` (or `/root`) as target and
    /// `$SANDBOX_WORKSPACE` (or `/workspace`) for the backup.
    pub fn detect() -> Self {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/root"));
        let workspace = std::env::var_os(WORKSPACE_ENV)
            .filter(|w| !w.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONTAINER_WORKSPACE));
        Self {
            target_home: home,
            shared_mount: PathBuf::from(CONTAINER_SHARED_MOUNT),
            staged_mount: PathBuf::from(CONTAINER_STAGED_MOUNT),
            legacy_primary_config: PathBuf::from(LEGACY_PRIMARY_CONFIG_MOUNT),
            legacy_credentials: PathBuf::from(LEGACY_CREDENTIALS_MOUNT),
            backup_dir: workspace.join(WORKSPACE_BACKUP_DIR),
        }
    }

    /// Same layout relocated under `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let under = |p: &str| root.join(p.trim_start_matches('/'));
        Self {
            target_home: root.join("home"),
            shared_mount: under(CONTAINER_SHARED_MOUNT),
            staged_mount: under(CONTAINER_STAGED_MOUNT),
            legacy_primary_config: under(LEGACY_PRIMARY_CONFIG_MOUNT),
            legacy_credentials: under(LEGACY_CREDENTIALS_MOUNT),
            backup_dir: under(CONTAINER_WORKSPACE).join(WORKSPACE_BACKUP_DIR),
        }
    }
}
