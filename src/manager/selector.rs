//! Resolving user selectors to registry records

use std::fmt;

use crate::registry::{RecordFilter, Registry, SandboxRecord};

use super::error::{Result, SandboxError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Exact identifier, or a prefix matching exactly one identifier.
    Identifier(String),
    /// Non-removed records for a project and/or feature; `latest` keeps only
    /// the newest.
    Matching {
        project: Option<String>,
        feature: Option<String>,
        latest: bool,
    },
    /// Every non-removed record.
    All,
}

impl Selector {
    pub fn identifier(id: &str) -> Self {
        Selector::Identifier(id.to_string())
    }

    pub fn latest(project: Option<&str>, feature: Option<&str>) -> Self {
        Selector::Matching {
            project: project.map(str::to_string),
            feature: feature.map(str::to_string),
            latest: true,
        }
    }

    pub fn matching(project: Option<&str>, feature: Option<&str>) -> Self {
        Selector::Matching {
            project: project.map(str::to_string),
            feature: feature.map(str::to_string),
            latest: false,
        }
    }

    fn filter(&self) -> RecordFilter {
        match self {
            Selector::Matching {
                project, feature, ..
            } => RecordFilter {
                project: project.clone(),
                feature: feature.clone(),
                ..RecordFilter::default()
            }
            .active(),
            Selector::Identifier(_) | Selector::All => RecordFilter::default().active(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Identifier(id) => f.write_str(id),
            Selector::Matching { latest, .. } => {
                let filter = self.filter();
                if *latest {
                    write!(f, "latest {}", filter.describe())
                } else {
                    f.write_str(&filter.describe())
                }
            }
            Selector::All => f.write_str("all sandboxes"),
        }
    }
}

/// Look up an identifier exactly, then as a unique prefix.
fn by_identifier(registry: &Registry, id: &str, include_removed: bool) -> Result<SandboxRecord> {
    if let Some(record) = registry.get(id)? {
        return Ok(record);
    }

    let mut candidates: Vec<SandboxRecord> = registry
        .find_by_prefix(id)?
        .into_iter()
        .filter(|r| include_removed || !r.is_removed())
        .collect();

    match candidates.len() {
        0 => Err(SandboxError::NotFound(id.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => Err(SandboxError::AmbiguousSelection {
            selector: id.to_string(),
            candidates: candidates.into_iter().map(|r| r.identifier).collect(),
        }),
    }
}

/// Exactly one record. Identifier lookups may return a removed record;
/// group selections only consider non-removed ones.
pub fn resolve_one(registry: &Registry, selector: &Selector) -> Result<SandboxRecord> {
    match selector {
        Selector::Identifier(id) => by_identifier(registry, id, false),
        Selector::Matching { latest: true, .. } => Ok(registry.find_latest(&selector.filter())?),
        Selector::Matching { latest: false, .. } | Selector::All => {
            let mut matches = registry.find(&selector.filter())?;
            match matches.len() {
                0 => Err(SandboxError::NotFound(selector.to_string())),
                1 => Ok(matches.remove(0)),
                _ => Err(SandboxError::AmbiguousSelection {
                    selector: selector.to_string(),
                    candidates: matches.into_iter().map(|r| r.identifier).collect(),
                }),
            }
        }
    }
}

/// Every record the selector names. `All` may be empty; anything else with
/// no match is `NotFound`.
pub fn resolve_many(
    registry: &Registry,
    selector: &Selector,
    include_removed: bool,
) -> Result<Vec<SandboxRecord>> {
    match selector {
        Selector::Identifier(id) => Ok(vec![by_identifier(registry, id, include_removed)?]),
        Selector::Matching { latest: true, .. } => {
            Ok(vec![registry.find_latest(&selector.filter())?])
        }
        Selector::Matching { latest: false, .. } => {
            let matches = registry.find(&selector.filter())?;
            if matches.is_empty() {
                return Err(SandboxError::NotFound(selector.to_string()));
            }
            Ok(matches)
        }
        Selector::All => Ok(registry.find(&selector.filter())?),
    }
}
