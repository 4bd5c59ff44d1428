//! Path normalization and comparison helpers.

use std::path::{Component, Path, PathBuf};

/// Trim trailing separators, keeping a bare root (`/`, `C:\`) intact.
pub fn trim_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        // "/" or "\\" on its own
        return &path[..path.len().min(1)];
    }
    if trimmed.len() == 2 && trimmed.as_bytes()[1] == b':' && path.len() > 2 {
        // keep "C:\" rather than "C:"
        return &path[..3];
    }
    trimmed
}

/// Normalize a path for use as a scan root.
pub fn normalize(path: &Path) -> PathBuf {
    PathBuf::from(trim_separators(&path.to_string_lossy()))
}

/// Whether `path` is a filesystem root (no parent component).
pub fn is_root(path: &Path) -> bool {
    let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
    match (components.next(), components.next(), components.next()) {
        (Some(Component::RootDir), None, _) => true,
        (Some(Component::Prefix(_)), Some(Component::RootDir), None) => true,
        (Some(Component::Prefix(_)), None, _) => true,
        _ => false,
    }
}

/// Display name for a root item: the last component, or the full path for a
/// filesystem root.
pub fn root_name(path: &Path) -> String {
    if is_root(path) {
        return path.to_string_lossy().into_owned();
    }
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Compare two path components the way the host filesystem does.
fn component_eq(a: &std::ffi::OsStr, b: &std::ffi::OsStr) -> bool {
    if cfg!(windows) {
        a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}

/// Whether two paths name the same location.
pub fn paths_equal(a: &Path, b: &Path) -> bool {
    let mut left = a.components();
    let mut right = b.components();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(l), Some(r)) if component_eq(l.as_os_str(), r.as_os_str()) => {}
            _ => return false,
        }
    }
}

/// Whether `path` is `ancestor` or lies below it.
pub fn is_within(path: &Path, ancestor: &Path) -> bool {
    let mut inner = path.components();
    for outer in ancestor.components() {
        match inner.next() {
            Some(c) if component_eq(c.as_os_str(), outer.as_os_str()) => {}
            _ => return false,
        }
    }
    true
}
