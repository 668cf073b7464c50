//! SQLite persistence for sandbox records

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row,
    TransactionBehavior,
};
use tracing::{debug, info, warn};

use super::error::{RegistryError, Result};
use super::record::{format_timestamp, parse_timestamp, ConfigMode, SandboxRecord, SandboxStatus};
use super::{ReconcileReport, RecordFilter, RegistryStats};

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "SELECT identifier, project, feature, container_ref, status, \
     created_at, last_seen_at, image_ref, config_mode FROM sandboxes";

/// Durable, indexed store of every sandbox ever created.
///
/// Writers take an immediate (reserved) transaction so concurrent processes
/// serialize on the database lock instead of losing read-modify-write updates.
pub struct Registry {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Row as stored, before parsing enum and timestamp columns.
struct RawRecord {
    identifier: String,
    project: String,
    feature: String,
    container_ref: String,
    status: String,
    created_at: String,
    last_seen_at: String,
    image_ref: String,
    config_mode: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identifier: row.get(0)?,
            project: row.get(1)?,
            feature: row.get(2)?,
            container_ref: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            last_seen_at: row.get(6)?,
            image_ref: row.get(7)?,
            config_mode: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<SandboxRecord> {
        let corrupt = |reason: String| RegistryError::Corrupt {
            identifier: self.identifier.clone(),
            reason,
        };
        let status: SandboxStatus = self.status.parse().map_err(corrupt)?;
        let config_mode: ConfigMode = self.config_mode.parse().map_err(corrupt)?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt(e.to_string()))?;
        let last_seen_at =
            parse_timestamp(&self.last_seen_at).map_err(|e| corrupt(e.to_string()))?;

        Ok(SandboxRecord {
            identifier: self.identifier,
            project: self.project,
            feature: self.feature,
            container_ref: self.container_ref,
            status,
            created_at,
            last_seen_at,
            image_ref: self.image_ref,
            config_mode,
        })
    }
}

impl Registry {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let registry = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        registry.bootstrap()?;
        debug!("Opened sandbox registry at {}", path.display());
        Ok(registry)
    }

    pub fn open_in_memory() -> Result<Self> {
        let registry = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        registry.bootstrap()?;
        Ok(registry)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn bootstrap(&self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while another process holds the write lock.
        // In-memory databases report "memory" and that is fine.
        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Registry journal mode: {}", mode);

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sandboxes (
                identifier    TEXT PRIMARY KEY NOT NULL,
                project       TEXT NOT NULL,
                feature       TEXT NOT NULL,
                container_ref TEXT NOT NULL UNIQUE,
                status        TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                last_seen_at  TEXT NOT NULL,
                image_ref     TEXT NOT NULL,
                config_mode   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sandboxes_project_feature_created
                ON sandboxes(project, feature, created_at);

            CREATE INDEX IF NOT EXISTS idx_sandboxes_status
                ON sandboxes(status);
            ",
        )?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    /// Insert a new record. A primary-key collision surfaces as
    /// `DuplicateIdentifier` so the caller can regenerate and retry.
    pub fn insert(&mut self, record: &SandboxRecord) -> Result<()> {
        insert_in(&self.conn, record)?;
        info!(
            "Registered sandbox {} ({}/{}) as {}",
            record.identifier, record.project, record.feature, record.status
        );
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Result<Option<SandboxRecord>> {
        get_in(&self.conn, identifier)
    }

    /// Conjunctive filter, newest first.
    pub fn find(&self, filter: &RecordFilter) -> Result<Vec<SandboxRecord>> {
        let mut sql = format!("{} WHERE 1=1", SELECT_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        if let Some(project) = &filter.project {
            sql.push_str(" AND project = ?");
            values.push(project.clone());
        }
        if let Some(feature) = &filter.feature {
            sql.push_str(" AND feature = ?");
            values.push(feature.clone());
        }
        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            values.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at DESC, identifier DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), RawRecord::from_row)?;
        let records = rows
            .map(|row| row.map_err(RegistryError::from)?.into_record())
            .collect::<Result<Vec<_>>>();
        records
    }

    /// Most recently created record matching `filter`.
    pub fn find_latest(&self, filter: &RecordFilter) -> Result<SandboxRecord> {
        let limited = RecordFilter {
            limit: Some(1),
            ..filter.clone()
        };
        self.find(&limited)?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::NotFound(filter.describe()))
    }

    /// Records whose identifier starts with `prefix`, newest first.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<SandboxRecord>> {
        let sql = format!(
            "{} WHERE substr(identifier, 1, length(?1)) = ?1 \
             ORDER BY created_at DESC, identifier DESC",
            SELECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![prefix], RawRecord::from_row)?;
        let records = rows
            .map(|row| row.map_err(RegistryError::from)?.into_record())
            .collect::<Result<Vec<_>>>();
        records
    }

    pub fn all(&self) -> Result<Vec<SandboxRecord>> {
        self.find(&RecordFilter::default())
    }

    /// Move a record to `new_status` and refresh `last_seen_at`.
    pub fn update_status(
        &mut self,
        identifier: &str,
        new_status: SandboxStatus,
        observed_at: DateTime<Utc>,
    ) -> Result<SandboxRecord> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM sandboxes WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;

        let current: SandboxStatus = match current {
            None => return Err(RegistryError::UnknownIdentifier(identifier.to_string())),
            Some(raw) => raw.parse().map_err(|reason| RegistryError::Corrupt {
                identifier: identifier.to_string(),
                reason,
            })?,
        };

        if current.is_terminal() {
            return Err(RegistryError::TerminalState(identifier.to_string()));
        }
        if !current.can_transition_to(new_status) {
            return Err(RegistryError::InvalidTransition {
                identifier: identifier.to_string(),
                from: current,
                to: new_status,
            });
        }

        tx.execute(
            "UPDATE sandboxes
             SET status = ?1, last_seen_at = MAX(last_seen_at, ?2)
             WHERE identifier = ?3",
            params![
                new_status.as_str(),
                format_timestamp(&observed_at),
                identifier,
            ],
        )?;

        let updated = get_in(&tx, identifier)?
            .ok_or_else(|| RegistryError::UnknownIdentifier(identifier.to_string()))?;
        tx.commit()?;

        if current != new_status {
            info!("Sandbox {}: {} -> {}", identifier, current, new_status);
        }
        Ok(updated)
    }

    /// Drift correction: every non-removed record whose container is absent
    /// from `live_container_refs` becomes `removed`. Live containers unknown to
    /// the registry are reported as orphans and never inserted.
    pub fn reconcile(
        &mut self,
        live_container_refs: &HashSet<String>,
        observed_at: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let tracked: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT identifier, container_ref FROM sandboxes WHERE status != 'removed'",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let tracked = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            tracked
        };

        let mut report = ReconcileReport {
            checked: tracked.len(),
            ..ReconcileReport::default()
        };
        let mut known: HashSet<&str> = HashSet::new();

        for (identifier, container_ref) in &tracked {
            if live_container_refs.contains(container_ref) {
                known.insert(container_ref.as_str());
                tx.execute(
                    "UPDATE sandboxes SET last_seen_at = MAX(last_seen_at, ?1)
                     WHERE identifier = ?2",
                    params![format_timestamp(&observed_at), identifier],
                )?;
                continue;
            }
            tx.execute(
                "UPDATE sandboxes SET status = 'removed' WHERE identifier = ?1",
                params![identifier],
            )?;
            warn!(
                "Sandbox {} lost its container {}; marked removed",
                identifier, container_ref
            );
            report.removed.push(identifier.clone());
        }

        let mut orphans: Vec<String> = live_container_refs
            .iter()
            .filter(|r| !known.contains(r.as_str()))
            .cloned()
            .collect();
        orphans.sort();
        report.orphans = orphans;

        tx.commit()?;
        Ok(report)
    }

    /// Physically delete removed records last seen before `older_than`.
    pub fn prune(&mut self, older_than: DateTime<Utc>) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM sandboxes WHERE status = 'removed' AND last_seen_at < ?1",
            params![format_timestamp(&older_than)],
        )?;
        if deleted > 0 {
            info!("Pruned {} removed sandbox record(s)", deleted);
        }
        Ok(deleted)
    }

    pub fn statistics(&self) -> Result<RegistryStats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sandboxes", [], |row| row.get(0))?;

        let mut by_status = Vec::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT status, COUNT(*) FROM sandboxes GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                if let Ok(status) = status.parse::<SandboxStatus>() {
                    by_status.push((status, count as usize));
                }
            }
        }
        by_status.sort_by_key(|(status, _)| SandboxStatus::ALL.iter().position(|s| s == status));

        let mut stmt = self.conn.prepare(
            "SELECT project, COUNT(*) AS n FROM sandboxes GROUP BY project ORDER BY n DESC, project",
        )?;
        let by_project = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(RegistryStats {
            total: total as usize,
            by_status,
            by_project,
        })
    }

    pub(super) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[cfg(test)]
    pub(super) fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub(super) fn get_in(conn: &Connection, identifier: &str) -> Result<Option<SandboxRecord>> {
    let raw = conn
        .query_row(
            &format!("{} WHERE identifier = ?1", SELECT_COLUMNS),
            params![identifier],
            RawRecord::from_row,
        )
        .optional()?;
    raw.map(RawRecord::into_record).transpose()
}

pub(super) fn insert_in(conn: &Connection, record: &SandboxRecord) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO sandboxes (
            identifier, project, feature, container_ref, status,
            created_at, last_seen_at, image_ref, config_mode
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.identifier,
            record.project,
            record.feature,
            record.container_ref,
            record.status.as_str(),
            format_timestamp(&record.created_at),
            format_timestamp(&record.last_seen_at),
            record.image_ref,
            record.config_mode.as_str(),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(err) => Err(map_insert_error(conn, record, err)),
    }
}

fn map_insert_error(
    conn: &Connection,
    record: &SandboxRecord,
    err: rusqlite::Error,
) -> RegistryError {
    if let rusqlite::Error::SqliteFailure(ref failure, ref message) = err {
        if failure.code == ErrorCode::ConstraintViolation {
            let message = message.as_deref().unwrap_or_default();
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || message.contains("sandboxes.identifier")
            {
                return RegistryError::DuplicateIdentifier(record.identifier.clone());
            }
            if message.contains("sandboxes.container_ref") {
                let owner: String = conn
                    .query_row(
                        "SELECT identifier FROM sandboxes WHERE container_ref = ?1",
                        params![record.container_ref],
                        |row| row.get(0),
                    )
                    .optional()
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                return RegistryError::DuplicateContainerRef {
                    container_ref: record.container_ref.clone(),
                    identifier: owner,
                };
            }
        }
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConfigMode, DEFAULT_IMAGE};
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    fn record(id: &str, project: &str, feature: &str, container: &str) -> SandboxRecord {
        SandboxRecord::new(
            id,
            project,
            feature,
            container,
            DEFAULT_IMAGE,
            ConfigMode::Mounted,
        )
    }

    fn record_at(id: &str, container: &str, minutes_ago: i64) -> SandboxRecord {
        let mut r = record(id, "billing", "refunds", container);
        r.created_at -= ChronoDuration::minutes(minutes_ago);
        r.last_seen_at = r.created_at;
        r
    }

    #[test]
    fn test_insert_then_find_latest_returns_record() {
        let mut registry = Registry::open_in_memory().unwrap();
        let r = record("sb-1", "billing", "refunds", "c1");
        registry.insert(&r).unwrap();

        let latest = registry
            .find_latest(&RecordFilter::for_pair("billing", "refunds"))
            .unwrap();
        assert_eq!(latest, r);
    }

    #[test]
    fn test_insert_duplicate_identifier() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("sb-1", "p", "f", "c1")).unwrap();

        let err = registry
            .insert(&record("sb-1", "p", "f", "c2"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIdentifier(ref id) if id == "sb-1"));
    }

    #[test]
    fn test_insert_duplicate_container_ref() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("sb-1", "p", "f", "c1")).unwrap();

        let err = registry
            .insert(&record("sb-2", "p", "f", "c1"))
            .unwrap_err();
        match err {
            RegistryError::DuplicateContainerRef {
                container_ref,
                identifier,
            } => {
                assert_eq!(container_ref, "c1");
                assert_eq!(identifier, "sb-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_find_orders_newest_first() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record_at("old", "c1", 30)).unwrap();
        registry.insert(&record_at("new", "c2", 1)).unwrap();
        registry.insert(&record_at("mid", "c3", 10)).unwrap();

        let ids: Vec<String> = registry
            .all()
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_find_filters_are_conjunctive() {
        let mut registry = Registry::open_in_memory().unwrap();
        for (id, project, feature, container) in [
            ("a", "billing", "refunds", "c1"),
            ("b", "billing", "invoices", "c2"),
            ("c", "search", "refunds", "c3"),
        ] {
            registry
                .insert(&record(id, project, feature, container))
                .unwrap();
        }
        registry
            .update_status("b", SandboxStatus::Running, Utc::now())
            .unwrap();

        let billing = registry
            .find(&RecordFilter::default().project("billing"))
            .unwrap();
        assert_eq!(billing.len(), 2);

        let refunds = registry
            .find(&RecordFilter::default().feature("refunds"))
            .unwrap();
        assert_eq!(refunds.len(), 2);

        let running_billing = registry
            .find(
                &RecordFilter::default()
                    .project("billing")
                    .statuses(&[SandboxStatus::Running]),
            )
            .unwrap();
        assert_eq!(running_billing.len(), 1);
        assert_eq!(running_billing[0].identifier, "b");

        let neither = registry
            .find(&RecordFilter::for_pair("search", "invoices"))
            .unwrap();
        assert!(neither.is_empty());
    }

    #[test]
    fn test_find_by_prefix() {
        let mut registry = Registry::open_in_memory().unwrap();
        for (id, container) in [("sb-abc-1", "c1"), ("sb-abc-2", "c2"), ("sb-xyz", "c3")] {
            registry.insert(&record(id, "p", "f", container)).unwrap();
        }

        assert_eq!(registry.find_by_prefix("sb-abc").unwrap().len(), 2);
        let xyz = registry.find_by_prefix("sb-x").unwrap();
        assert_eq!(xyz[0].identifier, "sb-xyz");
        assert!(registry.find_by_prefix("zz").unwrap().is_empty());
    }

    #[test]
    fn test_find_latest_not_found() {
        let registry = Registry::open_in_memory().unwrap();
        let err = registry
            .find_latest(&RecordFilter::for_pair("nope", "nada"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(ref s) if s.contains("nope")));
    }

    #[test]
    fn test_update_status_unknown_identifier() {
        let mut registry = Registry::open_in_memory().unwrap();
        let err = registry
            .update_status("ghost", SandboxStatus::Running, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownIdentifier(ref id) if id == "ghost"));
    }

    #[test]
    fn test_removed_is_terminal() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("sb", "p", "f", "c")).unwrap();
        registry
            .update_status("sb", SandboxStatus::Removed, Utc::now())
            .unwrap();

        for next in SandboxStatus::ALL {
            let err = registry.update_status("sb", next, Utc::now()).unwrap_err();
            assert!(matches!(err, RegistryError::TerminalState(_)), "{next}");
        }
    }

    #[test]
    fn test_running_stopped_cycle_and_invalid_transition() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("sb", "p", "f", "c")).unwrap();

        registry
            .update_status("sb", SandboxStatus::Running, Utc::now())
            .unwrap();
        registry
            .update_status("sb", SandboxStatus::Stopped, Utc::now())
            .unwrap();
        let r = registry
            .update_status("sb", SandboxStatus::Running, Utc::now())
            .unwrap();
        assert_eq!(r.status, SandboxStatus::Running);

        let err = registry
            .update_status("sb", SandboxStatus::Created, Utc::now())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let mut registry = Registry::open_in_memory().unwrap();
        let r = record("sb", "p", "f", "c");
        registry.insert(&r).unwrap();

        let stale = r.last_seen_at - ChronoDuration::hours(1);
        let updated = registry
            .update_status("sb", SandboxStatus::Running, stale)
            .unwrap();
        assert_eq!(updated.last_seen_at, r.last_seen_at);
    }

    #[test]
    fn test_reconcile_marks_missing_removed_and_reports_orphans() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry
            .insert(&record("alive", "p", "f", "c-alive"))
            .unwrap();
        registry
            .insert(&record("gone", "p", "f", "c-gone"))
            .unwrap();
        registry
            .update_status("alive", SandboxStatus::Running, Utc::now())
            .unwrap();
        registry
            .update_status("gone", SandboxStatus::Running, Utc::now())
            .unwrap();

        let live: HashSet<String> = ["c-alive", "c-stranger"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = registry.reconcile(&live, Utc::now()).unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.removed, vec!["gone".to_string()]);
        assert_eq!(report.orphans, vec!["c-stranger".to_string()]);
        assert_eq!(
            registry.get("gone").unwrap().unwrap().status,
            SandboxStatus::Removed
        );
        assert_eq!(
            registry.get("alive").unwrap().unwrap().status,
            SandboxStatus::Running
        );
    }

    #[test]
    fn test_prune_only_deletes_old_removed_records() {
        let mut registry = Registry::open_in_memory().unwrap();
        let forty_days = 60 * 24 * 40;
        for (id, container) in [("old-removed", "c1"), ("old-running", "c2")] {
            let r = record_at(id, container, forty_days);
            registry.insert(&r).unwrap();
        }
        registry.insert(&record_at("new-removed", "c3", 5)).unwrap();

        let old_seen = registry.get("old-removed").unwrap().unwrap().last_seen_at;
        registry
            .update_status("old-removed", SandboxStatus::Removed, old_seen)
            .unwrap();
        registry
            .update_status("new-removed", SandboxStatus::Removed, Utc::now())
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::days(30);
        assert_eq!(registry.prune(cutoff).unwrap(), 1);
        assert!(registry.get("old-removed").unwrap().is_none());
        assert!(registry.get("old-running").unwrap().is_some());
        assert!(registry.get("new-removed").unwrap().is_some());
    }

    #[test]
    fn test_statistics() {
        let mut registry = Registry::open_in_memory().unwrap();
        registry.insert(&record("a", "billing", "x", "c1")).unwrap();
        registry.insert(&record("b", "billing", "y", "c2")).unwrap();
        registry.insert(&record("c", "search", "z", "c3")).unwrap();
        registry
            .update_status("a", SandboxStatus::Running, Utc::now())
            .unwrap();

        let stats = registry.statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(SandboxStatus::Running), 1);
        assert_eq!(stats.count(SandboxStatus::Created), 2);
        assert_eq!(stats.by_project[0], ("billing".to_string(), 2));
    }

    #[test]
    fn test_required_indexes_exist() {
        let registry = Registry::open_in_memory().unwrap();
        let sql = "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'sandboxes'";
        let mut stmt = registry.connection().prepare(sql).unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        assert!(names.contains(&"idx_sandboxes_project_feature_created".to_string()));
        assert!(names.contains(&"idx_sandboxes_status".to_string()));
    }

    #[test]
    fn test_pair_lookup_uses_composite_index() {
        let registry = Registry::open_in_memory().unwrap();
        let plan: Vec<String> = registry
            .connection()
            .prepare(
                "EXPLAIN QUERY PLAN SELECT identifier FROM sandboxes
                 WHERE project = 'p' AND feature = 'f' ORDER BY created_at DESC",
            )
            .unwrap()
            .query_map([], |row| row.get::<_, String>(3))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert!(
            plan.iter()
                .any(|line| line.contains("idx_sandboxes_project_feature_created")),
            "{plan:?}"
        );
    }

    #[test]
    fn test_open_file_persists_across_handles() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("sessions.db");

        {
            let mut registry = Registry::open(&path).unwrap();
            registry.insert(&record("sb", "p", "f", "c")).unwrap();
            assert_eq!(registry.schema_version().unwrap(), SCHEMA_VERSION);
        }

        let registry = Registry::open(&path).unwrap();
        assert_eq!(registry.path(), Some(path.as_path()));
        assert!(registry.get("sb").unwrap().is_some());
    }

    #[test]
    fn test_concurrent_status_updates_serialize() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sessions.db");
        {
            let mut registry = Registry::open(&path).unwrap();
            for i in 0..8 {
                registry
                    .insert(&record(&format!("sb-{i}"), "p", "f", &format!("c-{i}")))
                    .unwrap();
            }
        }

        std::thread::scope(|scope| {
            for i in 0..8 {
                let path = path.clone();
                scope.spawn(move || {
                    let mut registry = Registry::open(&path).unwrap();
                    let id = format!("sb-{i}");
                    registry
                        .update_status(&id, SandboxStatus::Running, Utc::now())
                        .unwrap();
                    registry
                        .update_status(&id, SandboxStatus::Stopped, Utc::now())
                        .unwrap();
                });
            }
        });

        let registry = Registry::open(&path).unwrap();
        let stopped = registry
            .find(&RecordFilter::default().statuses(&[SandboxStatus::Stopped]))
            .unwrap();
        assert_eq!(stopped.len(), 8);
    }
}
