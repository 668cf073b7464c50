//! Sandbox record definition

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE: &str = "sandbox-claude-base:latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Created,
    Running,
    Stopped,
    Removed,
}

impl SandboxStatus {
    pub const ALL: [SandboxStatus; 4] = [
        SandboxStatus::Created,
        SandboxStatus::Running,
        SandboxStatus::Stopped,
        SandboxStatus::Removed,
    ];

    /// Statuses that may still have a live container behind them.
    pub const ACTIVE: [SandboxStatus; 3] = [
        SandboxStatus::Created,
        SandboxStatus::Running,
        SandboxStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Created => "created",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Removed => "removed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SandboxStatus::Removed)
    }

    /// Forward-only transitions, except `running <-> stopped`. Re-asserting the
    /// current status is allowed so observers can refresh `last_seen_at`.
    pub fn can_transition_to(&self, next: SandboxStatus) -> bool {
        use SandboxStatus::*;
        match (self, next) {
            (Removed, _) => false,
            (a, b) if *a == b => true,
            (Created, Running | Stopped | Removed) => true,
            (Running, Stopped | Removed) => true,
            (Stopped, Running | Removed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(SandboxStatus::Created),
            "running" => Ok(SandboxStatus::Running),
            "stopped" => Ok(SandboxStatus::Stopped),
            "removed" => Ok(SandboxStatus::Removed),
            other => Err(format!("unknown sandbox status: {}", other)),
        }
    }
}

/// Which configuration pathway a sandbox was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    /// Shared directory and staged bundle are bind-mounted into the container.
    #[default]
    Mounted,
    /// Bundle is staged into the workspace backup directory only.
    Workspace,
    /// No configuration is provided.
    None,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::Mounted => "mounted",
            ConfigMode::Workspace => "workspace",
            ConfigMode::None => "none",
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mounted" => Ok(ConfigMode::Mounted),
            "workspace" => Ok(ConfigMode::Workspace),
            "none" => Ok(ConfigMode::None),
            other => Err(format!("unknown config mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub identifier: String,
    pub project: String,
    pub feature: String,
    pub container_ref: String,
    pub status: SandboxStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub last_seen_at: DateTime<Utc>,
    #[serde(default = "default_image")]
    pub image_ref: String,
    #[serde(default)]
    pub config_mode: ConfigMode,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl SandboxRecord {
    pub fn new(
        identifier: &str,
        project: &str,
        feature: &str,
        container_ref: &str,
        image_ref: &str,
        config_mode: ConfigMode,
    ) -> Self {
        let now = now();
        Self {
            identifier: identifier.to_string(),
            project: project.to_string(),
            feature: feature.to_string(),
            container_ref: container_ref.to_string(),
            status: SandboxStatus::Created,
            created_at: now,
            last_seen_at: now,
            image_ref: image_ref.to_string(),
            config_mode,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Current time at the precision the registry stores.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so text order matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter writing timestamps in the sortable registry format.
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
