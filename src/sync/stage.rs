//! Host-side staging of a bundle before container creation

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::bundle::{CredentialBundle, CREDENTIALS};
use super::fsutil;
use super::source::{CredentialSource, DirectorySource};
use super::SyncError;

/// Legacy host location for the credentials file.
pub const LEGACY_HOST_CREDENTIALS: &str = ".claude_creds.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub path: PathBuf,
    /// Source the bundle came from; `None` when nothing was found.
    pub source: Option<String>,
    pub files: Vec<String>,
}

impl StageResult {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Host sources in priority order: the last-synced shared directory, then
/// the user's home (with the legacy credentials file as a fallback).
pub fn host_sources(shared_dir: &Path, home: &Path) -> Vec<DirectorySource> {
    vec![
        DirectorySource::new("shared", shared_dir).locked(),
        DirectorySource::new("home", home)
            .with_alias(CREDENTIALS, home.join(LEGACY_HOST_CREDENTIALS)),
    ]
}

/// Copy the bundle from the first source that supplies at least one file
/// into `dest`. No source at all still succeeds with an empty staging dir.
pub fn stage<S: CredentialSource>(
    bundle: &CredentialBundle,
    sources: &[S],
    dest: &Path,
) -> Result<StageResult, SyncError> {
    std::fs::create_dir_all(dest).map_err(|e| SyncError::write(dest, e))?;

    for source in sources {
        let guard = source.read_lock();
        let supplied: Vec<_> = bundle
            .files()
            .iter()
            .filter_map(|file| source.supply(file).map(|bytes| (file, bytes)))
            .collect();
        drop(guard);
        if supplied.is_empty() {
            debug!("Staging: {} has no bundle files", source.name());
            continue;
        }

        let mut files = Vec::with_capacity(supplied.len());
        for (file, bytes) in supplied {
            let path = file.path_in(dest);
            fsutil::write_atomic(&path, &bytes, file.mode())
                .map_err(|e| SyncError::write(&path, e))?;
            files.push(file.name.clone());
        }
        info!(
            "Staged {} bundle file(s) from {} into {}",
            files.len(),
            source.name(),
            dest.display()
        );
        return Ok(StageResult {
            path: dest.to_path_buf(),
            source: Some(source.name().to_string()),
            files,
        });
    }

    info!("No credential bundle found on host; staged an empty bundle");
    Ok(StageResult {
        path: dest.to_path_buf(),
        source: None,
        files: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bundle::{INSTRUCTIONS_DOC, PRIMARY_CONFIG};
    use std::fs;
    use std::thread;
    use std::time::Duration;

    fn put(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_stage_prefers_shared_bundle_whole() {
        let temp = tempfile::tempdir().unwrap();
        let shared = temp.path().join("shared");
        let home = temp.path().join("home");
        let dest = temp.path().join("staging/sb-1");
        put(&shared, ".claude/.credentials.json", "shared-creds");
        put(&home, ".claude.json", "{\"home\":1}");
        put(&home, ".claude/.credentials.json", "home-creds");

        let bundle = CredentialBundle::standard();
        let result = stage(&bundle, &host_sources(&shared, &home), &dest).unwrap();

        assert_eq!(result.source.as_deref(), Some("shared"));
        assert_eq!(result.files, vec![CREDENTIALS.to_string()]);
        assert_eq!(
            fs::read_to_string(dest.join(".claude/.credentials.json")).unwrap(),
            "shared-creds"
        );
        assert!(!dest.join(".claude.json").exists());
    }

    #[test]
    fn test_stage_falls_back_to_home_with_legacy_credentials() {
        let temp = tempfile::tempdir().unwrap();
        let shared = temp.path().join("shared");
        let home = temp.path().join("home");
        let dest = temp.path().join("staging");
        put(&home, ".claude.json", "{}");
        put(&home, LEGACY_HOST_CREDENTIALS, "legacy");
        put(&home, ".claude/CLAUDE.md", "# doc");

        let bundle = CredentialBundle::standard();
        let result = stage(&bundle, &host_sources(&shared, &home), &dest).unwrap();

        assert_eq!(result.source.as_deref(), Some("home"));
        assert_eq!(
            result.files,
            vec![
                PRIMARY_CONFIG.to_string(),
                CREDENTIALS.to_string(),
                INSTRUCTIONS_DOC.to_string()
            ]
        );
        assert_eq!(
            fs::read_to_string(dest.join(".claude/.credentials.json")).unwrap(),
            "legacy"
        );
    }

    #[test]
    fn test_stage_with_no_sources_is_empty_success() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("staging");
        let bundle = CredentialBundle::standard();
        let sources = host_sources(&temp.path().join("none"), &temp.path().join("nohome"));

        let result = stage(&bundle, &sources, &dest).unwrap();
        assert!(result.is_empty());
        assert!(result.source.is_none());
        assert!(dest.is_dir());
    }

    #[test]
    fn test_stage_waits_for_shared_writer() {
        let temp = tempfile::tempdir().unwrap();
        let shared = temp.path().join("shared");
        let home = temp.path().join("home");
        let dest = temp.path().join("staging");
        put(&shared, ".claude.json", "{\"old\":1}");
        put(&shared, ".claude/.credentials.json", "old-creds");

        // A push is halfway through rewriting the shared bundle.
        let writer = fsutil::lock_exclusive(&shared).unwrap();
        put(&shared, ".claude.json", "{\"new\":1}");

        let sources = host_sources(&shared, &home);
        let staging_dest = dest.clone();
        let staging = thread::spawn(move || {
            let bundle = CredentialBundle::standard();
            stage(&bundle, &sources, &staging_dest).unwrap()
        });
        thread::sleep(Duration::from_millis(200));
        put(&shared, ".claude/.credentials.json", "new-creds");
        drop(writer);

        let result = staging.join().unwrap();
        assert_eq!(result.source.as_deref(), Some("shared"));
        assert_eq!(
            fs::read_to_string(dest.join(".claude.json")).unwrap(),
            "{\"new\":1}"
        );
        assert_eq!(
            fs::read_to_string(dest.join(".claude/.credentials.json")).unwrap(),
            "new-creds"
        );
        assert!(!dest.join(".sync.lock").exists());
    }
}
