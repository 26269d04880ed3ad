//! Plain-text, line-oriented artifact logs.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Appends one line to `path`, creating the file and parent directories on demand.
pub fn append_text_line(path: &Path, line: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Truncates `path` and writes `first_line` as its only content.
pub fn reset_text_lines(path: &Path, first_line: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{first_line}")
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
