use std::path::PathBuf;

use thiserror::Error;

use crate::containers::RuntimeError;
use crate::naming::NameError;
use crate::registry::RegistryError;
use crate::sync::SyncError;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("Could not allocate a unique identifier for {project}/{feature} after {attempts} attempts")]
    DuplicateIdentifier {
        project: String,
        feature: String,
        attempts: usize,
    },

    #[error("Unknown sandbox identifier: {0}")]
    UnknownIdentifier(String),

    #[error("No sandbox matches {0}")]
    NotFound(String),

    #[error("'{selector}' matches {} sandboxes: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousSelection {
        selector: String,
        candidates: Vec<String>,
    },

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(#[source] RuntimeError),

    #[error("Image {image} could not be pulled: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Sandbox {0} is removed")]
    TerminalState(String),

    #[error("Workspace directory does not exist: {0}")]
    WorkspaceMissing(PathBuf),

    #[error("No command given")]
    EmptyCommand,

    #[error("{context}: {source}")]
    Runtime {
        context: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl SandboxError {
    /// Classify a runtime failure: engine unreachable, image problem, or an
    /// operation that failed for `context`.
    pub fn runtime(context: impl Into<String>, err: RuntimeError) -> Self {
        if err.is_unavailable() {
            return SandboxError::RuntimeUnavailable(err);
        }
        match err {
            RuntimeError::ImagePull { image, reason } => SandboxError::ImagePull { image, reason },
            source => SandboxError::Runtime {
                context: context.into(),
                source,
            },
        }
    }
}

impl From<RegistryError> for SandboxError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownIdentifier(id) => SandboxError::UnknownIdentifier(id),
            RegistryError::NotFound(selector) => SandboxError::NotFound(selector),
            RegistryError::TerminalState(id) => SandboxError::TerminalState(id),
            other => SandboxError::Registry(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
