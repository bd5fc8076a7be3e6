//! Remote path handling
// (c) 2025 Ross Younger
//!
//! Remote paths always use forward slashes, independent of the client's OS.
//! The empty string denotes the session root.

/// Joins a remote path and a leaf name.
///
/// Either side may be empty, in which case the other is returned.
#[must_use]
pub fn join_remote(base: &str, leaf: &str) -> String {
    if base.is_empty() {
        return leaf.to_string();
    }
    if leaf.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{leaf}")
    } else {
        format!("{base}/{leaf}")
    }
}

/// Normalises a user-supplied remote path: no leading or trailing slashes,
/// no empty or `.` components.
#[must_use]
pub fn normalize_remote(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a (normalised) remote path into its parent and final component
#[must_use]
pub fn split_remote(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}

/// Dotfiles are hidden from wildcards and recursive walks
#[must_use]
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Is this a plain directory entry name, safe to use as a single local path component?
pub(crate) fn is_simple_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
