use super::error::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn rw(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn ro(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::rw(host_path, container_path)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    pub working_dir: String,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub volumes: Vec<VolumeMount>,
    pub environment: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

/// What the engine currently reports for a container handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    /// Exists but not running; carries the engine's raw status (`exited`, `created`, ...).
    Stopped(String),
    Missing,
}

impl ContainerState {
    pub fn exists(&self) -> bool {
        !matches!(self, ContainerState::Missing)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn describe(&self) -> &str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Stopped(status) => status,
            ContainerState::Missing => "missing",
        }
    }
}

pub trait ContainerRuntimeInterface {
    // backend stuff
    fn is_daemon_running(&self) -> bool;

    fn image_exists_locally(&self, image: &str) -> bool;

    fn pull_image(&self, image: &str) -> Result<()>;

    /// Fail fast with an availability error before any lifecycle work.
    fn ensure_available(&self) -> Result<()> {
        if self.is_daemon_running() {
            Ok(())
        } else {
            Err(RuntimeError::DaemonNotRunning)
        }
    }

    /// Use a local image as-is, otherwise pull it.
    fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists_locally(image) {
            tracing::info!("Using local Docker image '{}'", image);
            return Ok(());
        }

        tracing::info!("Pulling Docker image '{}'", image);
        self.pull_image(image)
    }

    // container management
    /// Create and start a container; returns its handle.
    fn create_container(&self, name: &str, image: &str, config: &ContainerConfig)
        -> Result<String>;

    fn inspect(&self, handle: &str) -> Result<ContainerState>;

    fn start_container(&self, handle: &str) -> Result<()>;

    fn stop_container(&self, handle: &str, timeout_secs: u64) -> Result<()>;

    fn remove(&self, handle: &str, force: bool) -> Result<()>;

    /// Handles of every container (running or not) carrying `label`.
    fn list_containers(&self, label: &str) -> Result<Vec<String>>;

    /// Interactive shell argv for attaching to `handle`.
    fn exec_command(&self, handle: &str, user: Option<&str>) -> Vec<String>;

    /// Run `command` in `handle` without a TTY, output going straight to ours.
    /// Returns the command's exit code.
    fn exec(&self, handle: &str, user: Option<&str>, command: &[String]) -> Result<i32>;
}
