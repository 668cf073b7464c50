//! Container runtime collaborator: trait, Docker CLI backend and sandbox labels

pub mod container_interface;
pub mod docker;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use container_interface::{
    ContainerConfig, ContainerRuntimeInterface, ContainerState, VolumeMount,
};
pub use docker::Docker;
pub use error::{Result, RuntimeError};

use chrono::{DateTime, Utc};

pub const LABEL_PREFIX: &str = "sandbox.claude";
/// Present on every container this tool creates; `list` filters on it.
pub const LABEL_VERSION: &str = "sandbox.claude.version";
pub const LABEL_PROJECT: &str = "sandbox.claude.project";
pub const LABEL_FEATURE: &str = "sandbox.claude.feature";
pub const LABEL_CREATED: &str = "sandbox.claude.created";
pub const LABEL_IDENTIFIER: &str = "sandbox.claude.identifier";

pub fn default_container_runtime() -> Docker {
    Docker
}

/// Labels identifying a sandbox container as ours.
pub fn sandbox_labels(
    identifier: &str,
    project: &str,
    feature: &str,
    created: DateTime<Utc>,
) -> Vec<(String, String)> {
    vec![
        (LABEL_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string()),
        (LABEL_PROJECT.to_string(), project.to_string()),
        (LABEL_FEATURE.to_string(), feature.to_string()),
        (LABEL_CREATED.to_string(), created.to_rfc3339()),
        (LABEL_IDENTIFIER.to_string(), identifier.to_string()),
    ]
}

/// Short hostname derived from the identifier's random suffix.
pub fn hostname_for(identifier: &str) -> String {
    let tail = identifier.rsplit('-').next().unwrap_or(identifier);
    tail.chars().take(12).collect()
}

/// Display form of a container handle.
pub fn short_ref(container_ref: &str) -> &str {
    match container_ref.char_indices().nth(12) {
        Some((idx, _)) => &container_ref[..idx],
        None => container_ref,
    }
}
