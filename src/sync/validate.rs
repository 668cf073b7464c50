//! Sanity checks on a bundle root

use std::path::Path;

use serde_json::Value;

use super::bundle::{CredentialBundle, FileKind, PRIMARY_CONFIG};
use super::fsutil;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check that the primary config is valid JSON carrying some credential and
/// that secret files are not readable by group or others.
pub fn validate(bundle: &CredentialBundle, root: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    for file in bundle.present_in(root) {
        let path = file.path_in(root);

        if file.name == PRIMARY_CONFIG {
            let parsed = std::fs::read(&path).map(|bytes| serde_json::from_slice::<Value>(&bytes));
            match parsed {
                Ok(Ok(value)) => {
                    let has_credential = ["api_key", "token", "oauthAccount", "primaryApiKey"]
                        .iter()
                        .any(|k| value.get(k).is_some());
                    if !has_credential {
                        report
                            .warnings
                            .push(format!("No API key or account found in {}", path.display()));
                    }
                }
                Ok(Err(e)) => report
                    .errors
                    .push(format!("Invalid JSON in {}: {}", path.display(), e)),
                Err(e) => report
                    .errors
                    .push(format!("Cannot read {}: {}", path.display(), e)),
            }
        }

        if file.kind == FileKind::Secret {
            if let Ok(mode) = fsutil::mode_of(&path) {
                if mode & 0o077 != 0 {
                    report.warnings.push(format!(
                        "{} has permissive permissions {:o}",
                        path.display(),
                        mode
                    ));
                }
            }
        }
    }

    report
}
