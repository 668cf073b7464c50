//! Sandbox naming - identifier generation and label validation

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// Prefix shared by every sandbox identifier and container name.
pub const IDENTIFIER_PREFIX: &str = "sandbox-claude";

pub const MIN_NAME_LENGTH: usize = 1;
pub const MAX_NAME_LENGTH: usize = 50;
const MAX_SANITIZED_LENGTH: usize = 30;

/// Hex digits of random suffix. 48 bits keeps the birthday bound for 10k ids
/// issued inside one second below 1e-6.
const RANDOM_SUFFIX_LEN: usize = 12;

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static regex"));
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("static regex"));
static UNDERSCORE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("static regex"));
static HYPHEN_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("Invalid {field} name '{value}': use only letters, numbers, hyphens and underscores")]
    InvalidCharacters { field: &'static str, value: String },

    #[error(
        "Invalid {field} name '{value}': length must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH}"
    )]
    InvalidLength { field: &'static str, value: String },
}

impl NameError {
    pub fn value(&self) -> &str {
        match self {
            NameError::InvalidCharacters { value, .. } | NameError::InvalidLength { value, .. } => {
                value
            }
        }
    }
}

/// Validate a project or feature label.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), NameError> {
    let len = value.chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&len) {
        return Err(NameError::InvalidLength {
            field,
            value: value.to_string(),
        });
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(NameError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Label used when sanitizing leaves nothing, so names never contain `--`.
const EMPTY_LABEL: &str = "x";

/// Normalize a label for embedding in a container name.
pub fn sanitize_name(name: &str) -> String {
    let sanitized = INVALID_CHARS.replace_all(name, "-");
    let sanitized = UNDERSCORE_RUNS.replace_all(&sanitized, "-");
    let sanitized = HYPHEN_RUNS.replace_all(&sanitized, "-");
    let truncated: String = sanitized
        .trim_matches('-')
        .chars()
        .take(MAX_SANITIZED_LENGTH)
        .collect();
    let trimmed = truncated.trim_end_matches('-');
    if trimmed.is_empty() {
        return EMPTY_LABEL.to_string();
    }
    trimmed.to_lowercase()
}

/// Generate a fresh sandbox identifier:
/// `sandbox-claude-{project}-{feature}-{YYYYmmdd-HHMMSS}-{hex}`.
///
/// Uniqueness is probabilistic. Callers persisting the identifier must treat a
/// primary-key collision as retryable.
pub fn generate_identifier(project: &str, feature: &str) -> Result<String, NameError> {
    generate_identifier_at(project, feature, Utc::now())
}

pub fn generate_identifier_at(
    project: &str,
    feature: &str,
    now: DateTime<Utc>,
) -> Result<String, NameError> {
    validate_name("project", project)?;
    validate_name("feature", feature)?;

    Ok(format!(
        "{}-{}-{}-{}-{}",
        IDENTIFIER_PREFIX,
        sanitize_name(project),
        sanitize_name(feature),
        now.format(TIMESTAMP_FORMAT),
        random_suffix()
    ))
}

fn random_suffix() -> String {
    // v4 UUIDs come from the OS CSPRNG; the first 12 hex digits carry no
    // version/variant bits.
    let simple = Uuid::new_v4().simple().to_string();
    simple[..RANDOM_SUFFIX_LEN].to_string()
}
