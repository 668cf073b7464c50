use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(
        "Docker is not installed or not in PATH.\n\
         Install Docker: https://docs.docker.com/get-docker/"
    )]
    NotInstalled,

    #[error(
        "Docker daemon is not running.\n\
         Start Docker Desktop or run: sudo systemctl start docker"
    )]
    DaemonNotRunning,

    #[error(
        "Docker permission denied.\n\
         On Linux, add your user to the docker group:\n\
         sudo usermod -aG docker $USER\n\
         Then log out and back in."
    )]
    PermissionDenied,

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerAlreadyExists(String),

    #[error("Docker image {image} could not be resolved: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Failed to stop container: {0}")]
    StopFailed(String),

    #[error("Failed to remove container: {0}")]
    RemoveFailed(String),

    #[error("Docker command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RuntimeError {
    /// The engine itself cannot be reached, as opposed to a failed operation.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RuntimeError::NotInstalled
                | RuntimeError::DaemonNotRunning
                | RuntimeError::PermissionDenied
        )
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
