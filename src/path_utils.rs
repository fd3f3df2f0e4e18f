//! Lexical path utilities for bundle-relative paths
//!
//! Everything recorded in an Assembly Input Bundle is relative to the bundle
//! root, and everything written to a manifest is rendered with forward
//! slashes. None of these helpers touch the filesystem.

use std::path::{Component, Path, PathBuf};

use pathdiff::diff_paths;

/// Convert a path to a string using forward slashes as separators
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use assembly_input_bundle::path_utils::to_forward_slashes;
///
/// assert_eq!(to_forward_slashes(Path::new("blobs/abc")), "blobs/abc");
/// ```
pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lexically normalize a path: drop `.` components and fold `dir/..` pairs.
///
/// Leading `..` components of a relative path are kept, since there is
/// nothing to fold them into.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Compute `path` relative to the directory `base`, lexically.
///
/// Both paths are normalized first, then diffed with
/// [`pathdiff::diff_paths`]. When no relative form exists (one path is
/// absolute and the other is not, or `base` climbs above its start), `path`
/// is returned normalized.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use assembly_input_bundle::path_utils::relative_path;
///
/// assert_eq!(
///     relative_path(Path::new("blobs/abc"), Path::new("packages/foo")),
///     PathBuf::from("../../blobs/abc")
/// );
/// ```
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path = normalize(path);
    let base = normalize(base);
    if path.is_absolute() != base.is_absolute() {
        return path;
    }

    match diff_paths(&path, &base) {
        Some(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
        Some(relative) => relative,
        None => path,
    }
}

/// Whether `path` stays inside whatever directory it is joined onto: it is
/// relative, non-empty, and never climbs above its starting point.
pub fn is_contained_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return false;
    }
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Whether `name` can be used as a single path component in the bundle:
/// non-empty, not `.` or `..`, and limited to `[A-Za-z0-9._-]`.
pub fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The final component of `path` as an owned string, if it has one.
pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
