use thiserror::Error;

use super::SandboxStatus;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Sandbox identifier already exists: {0}")]
    DuplicateIdentifier(String),

    #[error("Container {container_ref} is already tracked by sandbox {identifier}")]
    DuplicateContainerRef {
        container_ref: String,
        identifier: String,
    },

    #[error("Unknown sandbox identifier: {0}")]
    UnknownIdentifier(String),

    #[error("No sandbox matches {0}")]
    NotFound(String),

    #[error("Sandbox {0} is removed; its status can no longer change")]
    TerminalState(String),

    #[error("Sandbox {identifier} cannot move from {from} to {to}")]
    InvalidTransition {
        identifier: String,
        from: SandboxStatus,
        to: SandboxStatus,
    },

    #[error("Registry row for {identifier} is corrupt: {reason}")]
    Corrupt { identifier: String, reason: String },

    #[error("Registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Registry interchange error: {0}")]
    Interchange(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
