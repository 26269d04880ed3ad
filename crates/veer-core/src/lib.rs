//! Foundational low-level utilities shared across Veer crates.
//!
//! Atomic file writes and line-oriented artifact logs used by workspace
//! materialization and override logs, a path component guard, and a
//! wall-clock helper.

pub mod atomic_io;
pub mod line_log;
pub mod path_component;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use line_log::{append_text_line, reset_text_lines};
pub use path_component::is_plain_path_component;
pub use time_utils::current_unix_timestamp_ms;
