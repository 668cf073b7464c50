//! In-container half: resolve the bundle at startup, push it back out on exit

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::bundle::{CredentialBundle, EMPTY_PRIMARY_CONFIG, PRIMARY_CONFIG};
use super::fsutil;
use super::source::{CredentialSource, DirectorySource, FileMountSource};
use super::{
    ContainerLayout, DestinationOutcome, DestinationReport, PullResult, PushResult,
    ResolvedFile, SyncError, SyncWarning,
};

/// Resolves bundle files into a target root from prioritized sources and
/// copies the live bundle back out to the shared and backup directories.
pub struct SyncEngine {
    bundle: CredentialBundle,
    target: PathBuf,
    sources: Vec<Box<dyn CredentialSource + Send + Sync>>,
    shared_dir: Option<PathBuf>,
    backup_dir: PathBuf,
}

impl SyncEngine {
    pub fn new(
        bundle: CredentialBundle,
        target: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bundle,
            target: target.into(),
            sources: Vec::new(),
            shared_dir: None,
            backup_dir: backup_dir.into(),
        }
    }

    /// Append a source; earlier sources win.
    pub fn with_source(mut self, source: impl CredentialSource + Send + Sync + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Durable cross-session push destination, used only when it exists.
    pub fn with_shared_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_dir = Some(dir.into());
        self
    }

    /// Engine wired for a container: shared mount, staged bundle, legacy per-file
    /// mounts, then the workspace backup.
    pub fn for_container(bundle: CredentialBundle, layout: &ContainerLayout) -> Self {
        Self::new(bundle, &layout.target_home, &layout.backup_dir)
            .with_shared_dir(&layout.shared_mount)
            .with_source(DirectorySource::new("shared", &layout.shared_mount))
            .with_source(DirectorySource::new("staged", &layout.staged_mount))
            .with_source(
                FileMountSource::new("host-mounts")
                    .with_file(PRIMARY_CONFIG, &layout.legacy_primary_config)
                    .with_file(super::bundle::CREDENTIALS, &layout.legacy_credentials),
            )
            .with_source(DirectorySource::new("workspace-backup", &layout.backup_dir))
    }

    pub fn bundle(&self) -> &CredentialBundle {
        &self.bundle
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Place every bundle file into the target root, taking each file from
    /// the first source that has it. A missing primary config is synthesized.
    pub fn pull(&self) -> Result<PullResult, SyncError> {
        let _shared_guard = self.shared_dir.as_deref().and_then(fsutil::lock_shared);
        let mut result = PullResult::default();

        for file in self.bundle.files() {
            let found = self
                .sources
                .iter()
                .find_map(|source| source.supply(file).map(|bytes| (source.name(), bytes)));

            let dest = file.path_in(&self.target);
            match found {
                Some((source, bytes)) => {
                    fsutil::write_atomic(&dest, &bytes, file.mode())
                        .map_err(|e| SyncError::write(&dest, e))?;
                    debug!("{} <- {} ({} bytes)", file.name, source, bytes.len());
                    result.resolved.push(ResolvedFile {
                        name: file.name.clone(),
                        source: source.to_string(),
                        path: dest,
                    });
                }
                None if file.name == PRIMARY_CONFIG && !dest.exists() => {
                    fsutil::write_atomic(&dest, EMPTY_PRIMARY_CONFIG, file.mode())
                        .map_err(|e| SyncError::write(&dest, e))?;
                    info!(
                        "No {} found in any source; created an empty default",
                        file.name
                    );
                    result.synthesized.push(file.name.clone());
                }
                None => {
                    if dest.is_file() {
                        fsutil::set_mode(&dest, file.mode())
                            .map_err(|e| SyncError::write(&dest, e))?;
                    }
                    debug!("{}: no source supplies it", file.name);
                    result.missing.push(file.name.clone());
                }
            }
        }

        Ok(result)
    }

    /// Copy the live bundle to the shared directory (when mounted and
    /// writable) and always to the workspace backup.
    pub fn push(&self) -> PushResult {
        let live: Vec<_> = self
            .bundle
            .present_in(&self.target)
            .into_iter()
            .filter_map(|file| match std::fs::read(file.path_in(&self.target)) {
                Ok(bytes) => Some((file, bytes)),
                Err(e) => {
                    warn!("Cannot read live {}: {}", file.name, e);
                    None
                }
            })
            .collect();

        let mut result = PushResult::default();
        if live.is_empty() {
            warn!("Nothing to push from {}", self.target.display());
            result.warnings.push(SyncWarning::NothingToSync);
            return result;
        }

        if let Some(shared) = &self.shared_dir {
            let outcome = if !fsutil::is_writable_dir(shared) {
                DestinationOutcome::Skipped("not mounted or not writable".to_string())
            } else {
                match fsutil::lock_exclusive(shared) {
                    Ok(_guard) => write_all(shared, &live),
                    Err(e) => DestinationOutcome::Failed(format!("lock: {}", e)),
                }
            };
            result.destinations.push(DestinationReport {
                name: "shared".to_string(),
                path: shared.clone(),
                outcome,
            });
        }

        let outcome = write_all(&self.backup_dir, &live);
        result.destinations.push(DestinationReport {
            name: "workspace-backup".to_string(),
            path: self.backup_dir.clone(),
            outcome,
        });

        for dest in &result.destinations {
            match &dest.outcome {
                DestinationOutcome::Written(n) => {
                    info!(
                        "Pushed {} file(s) to {} ({})",
                        n,
                        dest.name,
                        dest.path.display()
                    )
                }
                DestinationOutcome::Skipped(why) => debug!("Skipped {}: {}", dest.name, why),
                DestinationOutcome::Failed(why) => warn!("Push to {} failed: {}", dest.name, why),
            }
        }
        if result.succeeded() == 0 {
            result.warnings.push(SyncWarning::NoDestination);
        }
        result
    }
}

fn write_all(root: &Path, files: &[(&super::bundle::BundleFile, Vec<u8>)]) -> DestinationOutcome {
    for (file, bytes) in files {
        let dest = file.path_in(root);
        if let Err(e) = fsutil::write_atomic(&dest, bytes, file.mode()) {
            return DestinationOutcome::Failed(format!("{}: {}", dest.display(), e));
        }
    }
    DestinationOutcome::Written(files.len())
}
