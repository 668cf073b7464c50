//! Session registry - durable record of every sandbox ever created

pub mod error;
mod interchange;
mod record;
mod store;

pub use error::{RegistryError, Result};
pub use interchange::{ImportReport, InterchangeDocument, INTERCHANGE_VERSION};
pub use record::{
    format_timestamp, now, parse_timestamp, ConfigMode, SandboxRecord, SandboxStatus,
    DEFAULT_IMAGE,
};
pub use store::Registry;

/// Conjunctive lookup filter. Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub project: Option<String>,
    pub feature: Option<String>,
    pub statuses: Vec<SandboxStatus>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn for_pair(project: &str, feature: &str) -> Self {
        Self::default().project(project).feature(feature)
    }

    pub fn project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    pub fn feature(mut self, feature: &str) -> Self {
        self.feature = Some(feature.to_string());
        self
    }

    pub fn statuses(mut self, statuses: &[SandboxStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn active(self) -> Self {
        self.statuses(&SandboxStatus::ACTIVE)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Human-readable selector used in error messages.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.project {
            parts.push(format!("project={}", p));
        }
        if let Some(f) = &self.feature {
            parts.push(format!("feature={}", f));
        }
        if !self.statuses.is_empty() {
            let statuses: Vec<&str> = self.statuses.iter().map(|s| s.as_str()).collect();
            parts.push(format!("status={}", statuses.join("|")));
        }
        if parts.is_empty() {
            "any sandbox".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Outcome of a drift-correction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Non-removed records inspected.
    pub checked: usize,
    /// Identifiers transitioned to `removed` because their container vanished.
    pub removed: Vec<String>,
    /// Live container refs carrying our label that no record tracks.
    pub orphans: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: Vec<(SandboxStatus, usize)>,
    pub by_project: Vec<(String, usize)>,
}

impl RegistryStats {
    pub fn count(&self, status: SandboxStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
