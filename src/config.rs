//! User configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::registry::{ConfigMode, DEFAULT_IMAGE};

/// Overrides the application directory (`~/.sandbox_claude`).
pub const APP_DIR_ENV: &str = "SANDBOX_CLAUDE_HOME";
const APP_DIR_NAME: &str = ".sandbox_claude";

pub const DEFAULT_CONTAINER_USER: &str = "sandman";
pub const DEFAULT_SHARED_DIR: &str = "/tmp/csandbox";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_image")]
    pub default_image: String,

    #[serde(default)]
    pub default_config_mode: ConfigMode,

    /// User the container runs as. Empty uses the image default.
    #[serde(default = "default_user")]
    pub user: String,

    /// Host variables passed through by name.
    #[serde(default)]
    pub environment: Vec<String>,

    /// Fixed values; `$NAME` reads the host variable, `$$` escapes a literal `$`.
    #[serde(default)]
    pub environment_values: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_image: default_image(),
            default_config_mode: ConfigMode::default(),
            user: default_user(),
            environment: Vec::new(),
            environment_values: BTreeMap::new(),
            cpu_limit: None,
            memory_limit: None,
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl SandboxConfig {
    pub fn container_user(&self) -> Option<&str> {
        let user = self.user.trim();
        (!user.is_empty()).then_some(user)
    }

    /// Resolved `KEY=VALUE` pairs; unset host variables are skipped.
    pub fn resolved_environment(&self) -> Vec<(String, String)> {
        let mut values = Vec::new();
        for key in &self.environment {
            if let Ok(val) = std::env::var(key) {
                values.push((key.clone(), val));
            }
        }
        for (key, val) in &self.environment_values {
            if let Some(resolved) = resolve_env_value(val) {
                values.push((key.clone(), resolved));
            }
        }
        values
    }
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_user() -> String {
    DEFAULT_CONTAINER_USER.to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

/// If the value starts with `$`, read the named variable from the host
/// environment (`$$` escapes a literal `$`). Otherwise return it as-is.
pub(crate) fn resolve_env_value(val: &str) -> Option<String> {
    if let Some(rest) = val.strip_prefix("$$") {
        Some(format!("${}", rest))
    } else if let Some(var_name) = val.strip_prefix('$') {
        std::env::var(var_name).ok()
    } else {
        Some(val.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default = "default_prune_days")]
    pub prune_after_days: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            prune_after_days: default_prune_days(),
        }
    }
}

fn default_prune_days() -> u32 {
    30
}

/// An extra bundle file beyond the three built-in ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryFile {
    pub name: String,
    /// Path relative to a bundle root (the home directory on either side).
    pub path: String,
    #[serde(default = "default_true")]
    pub secret: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_shared_dir")]
    pub shared_dir: String,

    #[serde(default = "default_auxiliary_files")]
    pub auxiliary_files: Vec<AuxiliaryFile>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            auxiliary_files: default_auxiliary_files(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_shared_dir() -> String {
    DEFAULT_SHARED_DIR.to_string()
}

fn default_auxiliary_files() -> Vec<AuxiliaryFile> {
    vec![AuxiliaryFile {
        name: "settings".to_string(),
        path: ".claude/settings.json".to_string(),
        secret: true,
    }]
}

/// `~/.sandbox_claude`, or `$SANDBOX_CLAUDE_HOME` when set.
pub fn get_app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(APP_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Cannot find home directory")?;
    Ok(home.join(APP_DIR_NAME))
}

fn config_path() -> Result<PathBuf> {
    Ok(get_app_dir()?.join("config.toml"))
}

/// Expand a leading `~/` against the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}

/// Every filesystem location the tool touches on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub app_dir: PathBuf,
    pub registry: PathBuf,
    pub staging_root: PathBuf,
    pub shared_dir: PathBuf,
    /// Host bundle root holding the user's own credentials.
    pub home: PathBuf,
}

impl Paths {
    pub fn resolve(config: &Config) -> Result<Self> {
        let app_dir = get_app_dir()?;
        let home = dirs::home_dir().context("Cannot find home directory")?;
        Ok(Self::with_roots(config, app_dir, home))
    }

    /// Resolve against explicit roots instead of the process environment.
    pub fn with_roots(config: &Config, app_dir: PathBuf, home: PathBuf) -> Self {
        let registry = match &config.registry.path {
            Some(p) => expand_tilde(p),
            None => app_dir.join("sessions.db"),
        };
        Self {
            staging_root: app_dir.join("staging"),
            shared_dir: expand_tilde(&config.sync.shared_dir),
            registry,
            app_dir,
            home,
        }
    }

    pub fn staging_dir(&self, identifier: &str) -> PathBuf {
        self.staging_root.join(identifier)
    }
}
