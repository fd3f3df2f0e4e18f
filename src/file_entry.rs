//! `FileEntry`: a (source, destination) pair
//!
//! Used for bootfs files, config data, memory buckets and the contents and
//! includes of compiled packages. Entries order by source, then destination.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AibError, Result};
use crate::path_utils::to_forward_slashes;

/// A file to place somewhere: `source` is where it is read from, and
/// `destination` is where it ends up (in bootfs, in a package, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileEntry {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Write entries in the fini manifest format, one `destination=source`
    /// line per entry, in the order given.
    pub fn write_fini_manifest<'a, W, I>(entries: I, writer: &mut W) -> Result<()>
    where
        W: Write,
        I: IntoIterator<Item = &'a FileEntry>,
    {
        for entry in entries {
            writeln!(
                writer,
                "{}={}",
                to_forward_slashes(&entry.destination),
                to_forward_slashes(&entry.source)
            )
            .map_err(|e| AibError::FileWriteFailed {
                path: "fini manifest".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}
