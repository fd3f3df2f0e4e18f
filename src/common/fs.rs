//! Common file system operations with unified error handling
//!
//! Bundles are populated with hard links, never copies, unless the
//! filesystem refuses the link.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{AibError, Result};

fn copy_error(source: &Path, destination: &Path, e: std::io::Error) -> AibError {
    AibError::FileCopyFailed {
        source_path: source.display().to_string(),
        destination: destination.display().to_string(),
        source: e,
    }
}

fn file_write_error(path: &Path, e: &std::io::Error) -> AibError {
    AibError::FileWriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Ensure parent directory exists for a path
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| file_write_error(parent, &e))?;
    }
    Ok(())
}

/// Hard-link `source` to `destination`, creating any missing parent
/// directories and replacing whatever was at `destination`.
///
/// Falls back to copying the bytes when the link can't be made (for example
/// across devices). Returns the source path, which is what dependency
/// tracking needs to record.
pub fn fast_copy_makedirs(source: &Path, destination: &Path) -> Result<PathBuf> {
    // A missing source is a copy failure carrying NotFound.
    fs::metadata(source).map_err(|e| copy_error(source, destination, e))?;

    ensure_parent_dir(destination)?;
    if fs::symlink_metadata(destination).is_ok() {
        fs::remove_file(destination).map_err(|e| file_write_error(destination, &e))?;
    }

    if let Err(link_err) = fs::hard_link(source, destination) {
        warn!(
            source = %source.display(),
            destination = %destination.display(),
            error = %link_err,
            "hard link failed, copying instead"
        );
        fs::copy(source, destination).map_err(|e| copy_error(source, destination, e))?;
    }

    Ok(source.to_path_buf())
}

/// Remove a directory tree if it exists, then recreate it empty
pub fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| file_write_error(path, &e))?;
    }
    fs::create_dir_all(path).map_err(|e| file_write_error(path, &e))?;
    Ok(())
}

/// Read a whole file into a string
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| AibError::FileReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers never observe a half-written file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| file_write_error(path, &e))?;
    temp.write_all(contents)
        .map_err(|e| file_write_error(path, &e))?;
    temp.flush().map_err(|e| file_write_error(path, &e))?;
    temp.persist(path)
        .map_err(|e| file_write_error(path, &e.error))?;
    Ok(())
}
