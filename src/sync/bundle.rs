//! The set of files that make up a credential bundle

use std::path::{Path, PathBuf};

use crate::config::AuxiliaryFile;

pub const PRIMARY_CONFIG: &str = "primary_config";
pub const CREDENTIALS: &str = "credentials";
pub const INSTRUCTIONS_DOC: &str = "instructions_doc";

/// Default content for a primary config that no source could supply.
pub const EMPTY_PRIMARY_CONFIG: &[u8] = b"{}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Owner read/write only.
    Secret,
    /// Owner read/write, group read.
    Document,
}

impl FileKind {
    pub fn mode(&self) -> u32 {
        match self {
            FileKind::Secret => 0o600,
            FileKind::Document => 0o640,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub name: String,
    /// Location relative to any bundle root.
    pub relative_path: PathBuf,
    pub kind: FileKind,
}

impl BundleFile {
    pub fn new(name: &str, relative_path: &str, kind: FileKind) -> Self {
        Self {
            name: name.to_string(),
            relative_path: PathBuf::from(relative_path),
            kind,
        }
    }

    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.relative_path)
    }

    pub fn mode(&self) -> u32 {
        self.kind.mode()
    }
}

/// Named bundle files with their required permission modes. Every bundle root
/// (host home, shared dir, staging dir, container home, workspace backup)
/// uses the same relative layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    files: Vec<BundleFile>,
}

impl Default for CredentialBundle {
    fn default() -> Self {
        Self::standard()
    }
}

impl CredentialBundle {
    pub fn standard() -> Self {
        Self {
            files: vec![
                BundleFile::new(PRIMARY_CONFIG, ".claude.json", FileKind::Secret),
                BundleFile::new(CREDENTIALS, ".claude/.credentials.json", FileKind::Secret),
                BundleFile::new(INSTRUCTIONS_DOC, ".claude/CLAUDE.md", FileKind::Document),
            ],
        }
    }

    /// Standard files plus configured extras. Extras reusing a built-in name
    /// are ignored.
    pub fn with_auxiliary(auxiliary: &[AuxiliaryFile]) -> Self {
        let mut bundle = Self::standard();
        for aux in auxiliary {
            if bundle.get(&aux.name).is_some() {
                tracing::warn!(
                    "Ignoring auxiliary bundle file '{}': name already used",
                    aux.name
                );
                continue;
            }
            let kind = if aux.secret {
                FileKind::Secret
            } else {
                FileKind::Document
            };
            let file = BundleFile::new(&aux.name, &aux.path, kind);
            bundle.files.push(file);
        }
        bundle
    }

    pub fn files(&self) -> &[BundleFile] {
        &self.files
    }

    pub fn get(&self, name: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Files present under `root`.
    pub fn present_in(&self, root: &Path) -> Vec<&BundleFile> {
        self.files
            .iter()
            .filter(|f| f.path_in(root).is_file())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_bundle_modes() {
        let bundle = CredentialBundle::standard();
        assert_eq!(bundle.get(PRIMARY_CONFIG).unwrap().mode(), 0o600);
        assert_eq!(bundle.get(CREDENTIALS).unwrap().mode(), 0o600);
        assert_eq!(bundle.get(INSTRUCTIONS_DOC).unwrap().mode(), 0o640);
    }

    #[test]
    fn test_with_auxiliary_skips_duplicate_names() {
        let aux = vec![
            AuxiliaryFile {
                name: "settings".to_string(),
                path: ".claude/settings.json".to_string(),
                secret: false,
            },
            AuxiliaryFile {
                name: CREDENTIALS.to_string(),
                path: "elsewhere.json".to_string(),
                secret: true,
            },
        ];
        let bundle = CredentialBundle::with_auxiliary(&aux);
        assert_eq!(bundle.files().len(), 4);
        assert_eq!(bundle.get("settings").unwrap().kind, FileKind::Document);
        assert_eq!(
            bundle.get(CREDENTIALS).unwrap().relative_path,
            PathBuf::from(".claude/.credentials.json")
        );
    }

    #[test]
    fn test_present_in() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(".claude.json"), "{}").unwrap();
        let bundle = CredentialBundle::standard();
        let present: Vec<&str> = bundle
            .present_in(temp.path())
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(present, vec![PRIMARY_CONFIG]);
    }
}
