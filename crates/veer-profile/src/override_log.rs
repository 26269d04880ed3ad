//! Per-override append-only log artifact.
//!
//! Each run starts by truncating the file and writing a start marker; script
//! console calls and the final outcome are appended as `[<tag>] <text>` lines.

use std::path::{Path, PathBuf};

use serde_json::Value;
use veer_core::{append_text_line, reset_text_lines};

use crate::error::{StoreError, StoreResult};

pub const OVERRIDE_LOG_TAG_INFO: &str = "info";
pub const OVERRIDE_LOG_TAG_EXCEPTION: &str = "exception";

/// Location of an override's log file inside `log_dir`.
pub fn override_log_path(log_dir: &Path, override_id: &str) -> StoreResult<PathBuf> {
    StoreError::check_id("override", override_id)?;
    Ok(log_dir.join(format!("{override_id}.log")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideLog {
    path: PathBuf,
}

impl OverrideLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_override(log_dir: &Path, override_id: &str) -> StoreResult<Self> {
        override_log_path(log_dir, override_id).map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the artifact and writes the run start marker.
    pub fn begin(&self, message: &str) {
        let line = format_line(OVERRIDE_LOG_TAG_INFO, message);
        if let Err(error) = reset_text_lines(&self.path, &line) {
            tracing::warn!(path = %self.path.display(), %error, "override log reset failed");
        }
    }

    pub fn append(&self, tag: &str, message: &str) {
        if let Err(error) = append_text_line(&self.path, &format_line(tag, message)) {
            tracing::warn!(path = %self.path.display(), %error, "override log append failed");
        }
    }

    pub fn info(&self, message: &str) {
        self.append(OVERRIDE_LOG_TAG_INFO, message);
    }

    pub fn exception(&self, message: &str) {
        self.append(OVERRIDE_LOG_TAG_EXCEPTION, message);
    }
}

fn format_line(tag: &str, message: &str) -> String {
    format!("[{tag}] {message}")
}

/// Serializes a console argument: JSON text stays compact JSON, anything else
/// becomes a JSON string literal.
pub fn serialize_console_argument(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value.to_string(),
        Err(_) => Value::String(raw.to_string()).to_string(),
    }
}
