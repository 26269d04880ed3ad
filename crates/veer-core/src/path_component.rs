/// Returns true when `value` names a single entry inside a directory.
///
/// Rejects empty names, names starting with a dot (which covers `.` and
/// `..`), and names containing a path separator or NUL.
pub fn is_plain_path_component(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && !value
            .chars()
            .any(|ch| ch == '/' || ch == '\\' || ch == '\0')
}
