//! Registry export/import as a JSON interchange document

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{RegistryError, Result};
use super::record::{format_timestamp, now, SandboxRecord};
use super::store::{get_in, insert_in, Registry};
use crate::naming::validate_name;

pub const INTERCHANGE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterchangeDocument {
    pub version: u32,
    #[serde(with = "super::record::timestamp")]
    pub exported_at: DateTime<Utc>,
    pub records: Vec<SandboxRecord>,
}

/// Accept both the versioned document and a bare record array.
#[derive(Deserialize)]
#[serde(untagged)]
enum IncomingDocument {
    Document(InterchangeDocument),
    Records(Vec<SandboxRecord>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records skipped because their container ref belongs to another identifier.
    pub conflicts: Vec<String>,
    /// Records skipped because their project or feature label is invalid.
    pub rejected: Vec<String>,
}

impl Registry {
    /// Write every record to `path`. The file is replaced atomically.
    pub fn export(&self, path: &Path) -> Result<usize> {
        let document = InterchangeDocument {
            version: INTERCHANGE_VERSION,
            exported_at: now(),
            records: self.all()?,
        };
        let content = serde_json::to_string_pretty(&document)?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RegistryError::Io(e.error))?;

        info!(
            "Exported {} sandbox record(s) to {}",
            document.records.len(),
            path.display()
        );
        Ok(document.records.len())
    }

    /// Merge records from `path` by identifier. An existing record is replaced
    /// only when the imported `last_seen_at` is newer and its status is one the
    /// local record may move to, so a record already `removed` locally stays
    /// removed and a running sandbox never goes back to `created`.
    pub fn import(&mut self, path: &Path) -> Result<ImportReport> {
        let content = fs::read_to_string(path)?;
        let records = match serde_json::from_str::<IncomingDocument>(&content)? {
            IncomingDocument::Document(doc) => {
                if doc.version > INTERCHANGE_VERSION {
                    warn!(
                        "Interchange version {} is newer than supported {}; importing anyway",
                        doc.version, INTERCHANGE_VERSION
                    );
                }
                doc.records
            }
            IncomingDocument::Records(records) => records,
        };

        let tx = self
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = ImportReport::default();

        for incoming in &records {
            if let Err(e) = validate_labels(incoming) {
                warn!("Skipping {}: {}", incoming.identifier, e);
                report.rejected.push(incoming.identifier.clone());
                continue;
            }
            match get_in(&tx, &incoming.identifier)? {
                None => match insert_in(&tx, incoming) {
                    Ok(()) => report.inserted += 1,
                    Err(RegistryError::DuplicateContainerRef { .. }) => {
                        warn!(
                            "Skipping {}: container {} already tracked",
                            incoming.identifier, incoming.container_ref
                        );
                        report.conflicts.push(incoming.identifier.clone());
                    }
                    Err(e) => return Err(e),
                },
                Some(existing) if incoming.last_seen_at <= existing.last_seen_at => {
                    report.unchanged += 1
                }
                Some(existing) if !existing.status.can_transition_to(incoming.status) => {
                    debug!(
                        "Keeping {} as {}: cannot move to imported status {}",
                        existing.identifier, existing.status, incoming.status
                    );
                    report.unchanged += 1;
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE sandboxes
                         SET status = ?1, last_seen_at = ?2, image_ref = ?3, config_mode = ?4
                         WHERE identifier = ?5",
                        params![
                            incoming.status.as_str(),
                            format_timestamp(&incoming.last_seen_at),
                            incoming.image_ref,
                            incoming.config_mode.as_str(),
                            incoming.identifier,
                        ],
                    )?;
                    report.updated += 1;
                }
            }
        }

        tx.commit()?;
        info!(
            "Imported {}: {} inserted, {} updated, {} unchanged, {} conflicts, {} rejected",
            path.display(),
            report.inserted,
            report.updated,
            report.unchanged,
            report.conflicts.len(),
            report.rejected.len()
        );
        Ok(report)
    }
}

fn validate_labels(record: &SandboxRecord) -> std::result::Result<(), String> {
    if record.identifier.trim().is_empty() {
        return Err("empty identifier".to_string());
    }
    validate_name("project", &record.project).map_err(|e| e.to_string())?;
    validate_name("feature", &record.feature).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConfigMode, SandboxStatus, DEFAULT_IMAGE};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn record(id: &str, container: &str) -> SandboxRecord {
        SandboxRecord::new(
            id,
            "billing",
            "refunds",
            container,
            DEFAULT_IMAGE,
            ConfigMode::Mounted,
        )
    }

    fn by_id(records: Vec<SandboxRecord>) -> HashMap<String, SandboxRecord> {
        records
            .into_iter()
            .map(|r| (r.identifier.clone(), r))
            .collect()
    }

    #[test]
    fn test_export_import_roundtrip_into_empty_registry() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut source = Registry::open_in_memory().unwrap();
        source.insert(&record("a", "c1")).unwrap();
        source.insert(&record("b", "c2")).unwrap();
        source
            .update_status("b", SandboxStatus::Running, Utc::now())
            .unwrap();
        source
            .update_status("a", SandboxStatus::Removed, Utc::now())
            .unwrap();
        assert_eq!(source.export(&path).unwrap(), 2);

        let mut target = Registry::open_in_memory().unwrap();
        let report = target.import(&path).unwrap();
        assert_eq!(report.inserted, 2);

        assert_eq!(by_id(source.all().unwrap()), by_id(target.all().unwrap()));
    }

    #[test]
    fn test_export_document_is_self_describing() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("a", "c1")).unwrap();
        registry.export(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], INTERCHANGE_VERSION);
        assert_eq!(value["records"][0]["identifier"], "a");
        let created_at = value["records"][0]["created_at"].as_str().unwrap();
        assert!(created_at.ends_with('Z'));
    }

    #[test]
    fn test_import_prefers_newer_last_seen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut local = Registry::open_in_memory().unwrap();
        local.insert(&record("a", "c1")).unwrap();
        local.insert(&record("b", "c2")).unwrap();

        let mut newer_a = local.get("a").unwrap().unwrap();
        newer_a.status = SandboxStatus::Stopped;
        newer_a.last_seen_at += chrono::Duration::minutes(5);
        let mut older_b = local.get("b").unwrap().unwrap();
        older_b.status = SandboxStatus::Running;
        older_b.last_seen_at -= chrono::Duration::minutes(5);

        let json = serde_json::to_string(&vec![newer_a.clone(), older_b]).unwrap();
        fs::write(&path, json).unwrap();

        let report = local.import(&path).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);

        let a = local.get("a").unwrap().unwrap();
        assert_eq!(a.status, SandboxStatus::Stopped);
        assert_eq!(a.last_seen_at, newer_a.last_seen_at);
        assert_eq!(
            local.get("b").unwrap().unwrap().status,
            SandboxStatus::Created
        );
    }

    #[test]
    fn test_import_keeps_local_removed_terminal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut local = Registry::open_in_memory().unwrap();
        local.insert(&record("a", "c1")).unwrap();
        local
            .update_status("a", SandboxStatus::Removed, Utc::now())
            .unwrap();

        let mut newer = local.get("a").unwrap().unwrap();
        newer.status = SandboxStatus::Running;
        newer.last_seen_at += chrono::Duration::minutes(1);
        fs::write(&path, serde_json::to_string(&vec![newer]).unwrap()).unwrap();

        local.import(&path).unwrap();
        assert_eq!(
            local.get("a").unwrap().unwrap().status,
            SandboxStatus::Removed
        );
    }

    #[test]
    fn test_import_never_moves_status_backwards() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut local = Registry::open_in_memory().unwrap();
        local.insert(&record("a", "c1")).unwrap();
        local
            .update_status("a", SandboxStatus::Running, Utc::now())
            .unwrap();

        let mut stale = local.get("a").unwrap().unwrap();
        stale.status = SandboxStatus::Created;
        stale.last_seen_at += chrono::Duration::minutes(5);
        fs::write(&path, serde_json::to_string(&vec![stale]).unwrap()).unwrap();

        let report = local.import(&path).unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(
            local.get("a").unwrap().unwrap().status,
            SandboxStatus::Running
        );
    }

    #[test]
    fn test_import_rejects_invalid_labels() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let empty_project =
            SandboxRecord::new("x", "", "refunds", "c1", DEFAULT_IMAGE, ConfigMode::Mounted);
        let bad_feature = SandboxRecord::new(
            "y",
            "billing",
            "bad name!",
            "c2",
            DEFAULT_IMAGE,
            ConfigMode::Mounted,
        );
        let records = vec![empty_project, bad_feature, record("z", "c3")];
        fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let mut local = Registry::open_in_memory().unwrap();
        let report = local.import(&path).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected, vec!["x".to_string(), "y".to_string()]);
        assert!(local.get("x").unwrap().is_none());
        assert!(local.get("y").unwrap().is_none());
        assert!(local.get("z").unwrap().is_some());
    }

    #[test]
    fn test_import_reports_container_conflicts() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("export.json");

        let mut local = Registry::open_in_memory().unwrap();
        local.insert(&record("a", "shared")).unwrap();
        let json = serde_json::to_string(&vec![record("b", "shared")]).unwrap();
        fs::write(&path, json).unwrap();

        let report = local.import(&path).unwrap();
        assert_eq!(report.conflicts, vec!["b".to_string()]);
        assert!(local.get("b").unwrap().is_none());
    }

    #[test]
    fn test_import_invalid_json() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ invalid json }").unwrap();

        let mut registry = Registry::open_in_memory().unwrap();
        assert!(matches!(
            registry.import(&path),
            Err(RegistryError::Interchange(_))
        ));
    }
}
