//! Per-profile working directory: linked static data files plus the resolved
//! engine config.

use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use veer_core::{is_plain_path_component, write_text_atomic};

use crate::error::ProfileError;
use crate::profile_types::ResolvedConfig;

/// Static geo/IP datasets shared by every profile workspace.
pub const AUXILIARY_DATA_FILES: [&str; 4] = ["country.mmdb", "geoip.dat", "geosite.dat", "ASN.mmdb"];
pub const WORKSPACE_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// Hard linking failed (e.g. across filesystems) and the file was copied.
    Copied,
    SkippedExisting,
    SkippedMissingSource,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
    pub links: Vec<(String, LinkOutcome)>,
}

#[derive(Debug, Clone)]
pub struct WorkspaceMaterializer {
    work_root: PathBuf,
    resources_dir: PathBuf,
}

impl WorkspaceMaterializer {
    pub fn new(work_root: impl Into<PathBuf>, resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            resources_dir: resources_dir.into(),
        }
    }

    /// Workspace directory for `selector`; selectors that are not a plain
    /// file name are rejected.
    pub fn work_dir(&self, selector: &str) -> Result<PathBuf, ProfileError> {
        if !is_plain_path_component(selector) {
            return Err(ProfileError::Workspace {
                selector: selector.to_string(),
                message: "selector is not a plain directory name".to_string(),
            });
        }
        Ok(self.work_root.join(selector))
    }

    pub fn config_path(&self, selector: &str) -> Result<PathBuf, ProfileError> {
        Ok(self.work_dir(selector)?.join(WORKSPACE_CONFIG_FILE))
    }

    /// Prepares the workspace for `resolved.selector` and writes its config.
    ///
    /// Data file linking is best-effort; only directory creation and the
    /// config write can fail.
    pub async fn materialize(
        &self,
        resolved: &ResolvedConfig,
    ) -> Result<MaterializeReport, ProfileError> {
        let selector = resolved.selector.as_str();
        let work_dir = self.work_dir(selector)?;
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|error| ProfileError::Workspace {
                selector: selector.to_string(),
                message: format!("failed to create {}: {error}", work_dir.display()),
            })?;

        let links = self.link_auxiliary_files(&work_dir).await;

        let config_path = work_dir.join(WORKSPACE_CONFIG_FILE);
        let write_path = config_path.clone();
        let serialized = resolved.serialized.clone();
        tokio::task::spawn_blocking(move || write_text_atomic(&write_path, &serialized))
            .await
            .map_err(|error| ProfileError::Workspace {
                selector: selector.to_string(),
                message: format!("config write task failed: {error}"),
            })?
            .map_err(|error| ProfileError::Workspace {
                selector: selector.to_string(),
                message: format!("{error:#}"),
            })?;

        Ok(MaterializeReport {
            work_dir,
            config_path,
            links,
        })
    }

    async fn link_auxiliary_files(&self, work_dir: &Path) -> Vec<(String, LinkOutcome)> {
        let tasks = AUXILIARY_DATA_FILES.iter().map(|file| {
            let source = self.resources_dir.join(file);
            let target = work_dir.join(file);
            async move {
                let outcome =
                    tokio::task::spawn_blocking(move || link_auxiliary_file(&source, &target))
                        .await
                        .unwrap_or_else(|error| LinkOutcome::Failed(error.to_string()));
                match &outcome {
                    LinkOutcome::Failed(reason) => {
                        tracing::warn!(file, reason = reason.as_str(), "auxiliary data link failed")
                    }
                    other => tracing::debug!(file, outcome = ?other, "auxiliary data file checked"),
                }
                (file.to_string(), outcome)
            }
        });
        join_all(tasks).await
    }
}

fn link_auxiliary_file(source: &Path, target: &Path) -> LinkOutcome {
    if target.symlink_metadata().is_ok() {
        return LinkOutcome::SkippedExisting;
    }
    if !source.is_file() {
        return LinkOutcome::SkippedMissingSource;
    }
    match std::fs::hard_link(source, target) {
        Ok(()) => LinkOutcome::Linked,
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            LinkOutcome::SkippedExisting
        }
        Err(link_error) => match std::fs::copy(source, target) {
            Ok(_) => LinkOutcome::Copied,
            Err(copy_error) => {
                LinkOutcome::Failed(format!("link: {link_error}; copy: {copy_error}"))
            }
        },
    }
}
