use std::path::PathBuf;

use thiserror::Error;
use veer_core::is_plain_path_component;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by profile, override, operator, and app config stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} id '{id}' is not a plain file name")]
    InvalidId { kind: &'static str, id: String },
    #[error("invalid document at '{}': {reason}", path.display())]
    InvalidDocument { path: PathBuf, reason: String },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Rejects ids that would escape the directory they are joined under.
    pub fn check_id(kind: &'static str, id: &str) -> StoreResult<()> {
        if is_plain_path_component(id) {
            Ok(())
        } else {
            Err(Self::InvalidId {
                kind,
                id: id.to_string(),
            })
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that abort a resolution before anything is cached.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("no current profile is selected")]
    NoCurrentProfile,
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),
    #[error("failed to load profile '{selector}': {source}")]
    ProfileLoad {
        selector: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to load override config: {0}")]
    OverrideConfig(#[source] StoreError),
    #[error("failed to load operator config: {0}")]
    OperatorConfig(#[source] StoreError),
    #[error("failed to serialize resolved config: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to materialize workspace for profile '{selector}': {message}")]
    Workspace { selector: String, message: String },
}

/// Failure to parse a declarative patch document.
#[derive(Debug, Error)]
pub enum PatchParseError {
    #[error("patch is not valid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("patch cannot be represented as a profile tree: {0}")]
    Json(#[from] serde_json::Error),
}
