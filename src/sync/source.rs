//! Candidate locations a bundle file can be supplied from

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::bundle::BundleFile;
use super::fsutil::{self, DirLock};

/// One place that may be able to supply bundle files. An unavailable or
/// unreadable source simply supplies nothing.
pub trait CredentialSource {
    fn name(&self) -> &str;

    /// Content of `file`, or `None` when this source does not have it.
    fn supply(&self, file: &BundleFile) -> Option<Vec<u8>>;

    /// Lock held while a reader takes several files from this source, so a
    /// concurrent writer cannot leave it with a mixed bundle.
    fn read_lock(&self) -> Option<DirLock> {
        None
    }
}

fn read_if_file(path: &Path) -> Option<Vec<u8>> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

/// A bundle root directory, optionally with fallback paths per file.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    name: String,
    root: PathBuf,
    aliases: HashMap<String, Vec<PathBuf>>,
    locked: bool,
}

impl DirectorySource {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
            aliases: HashMap::new(),
            locked: false,
        }
    }

    /// Read under the directory's shared lock. Only for directories that
    /// writers lock, since taking the lock creates a lock file in `root`.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Also accept `path` for `file_name` when the standard location is absent.
    pub fn with_alias(mut self, file_name: &str, path: impl Into<PathBuf>) -> Self {
        self.aliases
            .entry(file_name.to_string())
            .or_default()
            .push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CredentialSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, file: &BundleFile) -> Option<Vec<u8>> {
        if let Some(bytes) = read_if_file(&file.path_in(&self.root)) {
            return Some(bytes);
        }
        self.aliases
            .get(&file.name)
            .into_iter()
            .flatten()
            .find_map(|p| read_if_file(p))
    }

    fn read_lock(&self) -> Option<DirLock> {
        if self.locked {
            fsutil::lock_shared(&self.root)
        } else {
            None
        }
    }
}

/// Individually bind-mounted files, keyed by bundle file name.
#[derive(Debug, Clone, Default)]
pub struct FileMountSource {
    name: String,
    files: HashMap<String, PathBuf>,
}

impl FileMountSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, file_name: &str, path: impl Into<PathBuf>) -> Self {
        self.files.insert(file_name.to_string(), path.into());
        self
    }
}

impl CredentialSource for FileMountSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, file: &BundleFile) -> Option<Vec<u8>> {
        self.files.get(&file.name).and_then(|p| read_if_file(p))
    }
}

/// Bundle content held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, file_name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(file_name.to_string(), content.into());
        self
    }
}

impl CredentialSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, file: &BundleFile) -> Option<Vec<u8>> {
        self.files.get(&file.name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bundle::{CredentialBundle, CREDENTIALS, PRIMARY_CONFIG};
    use std::fs;

    #[test]
    fn test_directory_source_missing_root_supplies_nothing() {
        let bundle = CredentialBundle::standard();
        let source = DirectorySource::new("shared", "/definitely/not/here");
        for file in bundle.files() {
            assert!(source.supply(file).is_none());
        }
    }

    #[test]
    fn test_directory_source_alias_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let legacy = temp.path().join(".claude_creds.json");
        fs::write(&legacy, "legacy").unwrap();

        let bundle = CredentialBundle::standard();
        let creds = bundle.get(CREDENTIALS).unwrap();
        let source = DirectorySource::new("home", temp.path()).with_alias(CREDENTIALS, &legacy);
        assert_eq!(source.supply(creds).unwrap(), b"legacy");

        fs::create_dir_all(temp.path().join(".claude")).unwrap();
        fs::write(temp.path().join(".claude/.credentials.json"), "current").unwrap();
        assert_eq!(source.supply(creds).unwrap(), b"current");
    }

    #[test]
    fn test_only_locked_directory_sources_take_a_lock() {
        let temp = tempfile::tempdir().unwrap();
        let plain = DirectorySource::new("home", temp.path());
        assert!(plain.read_lock().is_none());
        assert!(!temp.path().join(fsutil::LOCK_FILE).exists());

        let shared = DirectorySource::new("shared", temp.path()).locked();
        assert!(shared.read_lock().is_some());
        assert!(temp.path().join(fsutil::LOCK_FILE).exists());
    }

    #[test]
    fn test_file_mount_source() {
        let temp = tempfile::tempdir().unwrap();
        let mounted = temp.path().join(".claude.json.host");
        fs::write(&mounted, "{\"a\":1}").unwrap();

        let bundle = CredentialBundle::standard();
        let source = FileMountSource::new("host-mounts").with_file(PRIMARY_CONFIG, &mounted);
        assert_eq!(
            source.supply(bundle.get(PRIMARY_CONFIG).unwrap()).unwrap(),
            b"{\"a\":1}"
        );
        assert!(source.supply(bundle.get(CREDENTIALS).unwrap()).is_none());
    }
}
