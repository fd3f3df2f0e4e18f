//! Hard-linking loose files into the bundle
//!
//! Every file placed in the bundle outside of the package blob store goes
//! through [`FileEntryCopier`], which remembers the source behind each
//! bundle path for the whole build. Asking for the same source at the same
//! path again is a no-op; a different source at an occupied path is an
//! error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::bundle::ConfigDataEntries;
use crate::common::fs::fast_copy_makedirs;
use crate::depfile::DepSet;
use crate::error::{AibError, Result};
use crate::file_entry::FileEntry;
use crate::path_utils::{file_name_of, is_contained_relative, is_safe_component};

pub const BOOTFS_DIR: &str = "bootfs";
pub const CONFIG_DATA_DIR: &str = "config_data";
pub const KERNEL_DIR: &str = "kernel";
pub const MEMORY_BUCKETS_DIR: &str = "memory_buckets";

#[derive(Debug)]
pub(crate) struct FileEntryCopier {
    outdir: PathBuf,

    /// Bundle-relative destination -> source it was linked from
    copied: BTreeMap<PathBuf, PathBuf>,
}

impl FileEntryCopier {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            copied: BTreeMap::new(),
        }
    }

    /// Link `source` to `bundle_path`, returning the path that was read.
    pub fn copy(&mut self, source: &Path, bundle_path: &Path) -> Result<PathBuf> {
        self.copy_or_else(source, bundle_path, |existing| {
            AibError::ConflictingDestination {
                destination: bundle_path.display().to_string(),
                existing_source: existing.display().to_string(),
                new_source: source.display().to_string(),
            }
        })
    }

    /// Like [`Self::copy`], with the error for an occupied destination
    /// supplied by the caller. `conflict` is given the existing source.
    pub fn copy_or_else<F>(
        &mut self,
        source: &Path,
        bundle_path: &Path,
        conflict: F,
    ) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> AibError,
    {
        match self.copied.get(bundle_path) {
            Some(existing) if existing == source => return Ok(source.to_path_buf()),
            Some(existing) => return Err(conflict(existing)),
            None => {}
        }

        let dep = fast_copy_makedirs(source, &self.outdir.join(bundle_path))?;
        self.copied
            .insert(bundle_path.to_path_buf(), source.to_path_buf());
        Ok(dep)
    }

    /// Copy each entry to `<subdirectory>/<destination>`.
    ///
    /// The returned entries have the bundle-relative path as their source
    /// and the destination as given. Returns empty results for empty input.
    pub fn copy_file_entries<'a, I>(
        &mut self,
        entries: I,
        subdirectory: &Path,
    ) -> Result<(Vec<FileEntry>, DepSet)>
    where
        I: IntoIterator<Item = &'a FileEntry>,
    {
        let mut results = Vec::new();
        let mut deps = DepSet::new();

        for entry in entries {
            if !is_contained_relative(&entry.destination) {
                return Err(AibError::InvalidDestination {
                    destination: entry.destination.display().to_string(),
                });
            }
            let rebased = subdirectory.join(&entry.destination);
            deps.insert(self.copy(&entry.source, &rebased)?);
            results.push(FileEntry::new(rebased, entry.destination.clone()));
        }

        if !results.is_empty() {
            debug!(
                count = results.len(),
                subdirectory = %subdirectory.display(),
                "copied file entries"
            );
        }
        Ok((results, deps))
    }

    /// Copy config data entries to `config_data/<package>/<path>`.
    ///
    /// Each destination must look like `meta/data/<package>/<path>`.
    /// Duplicate entries are collapsed, and the result is keyed by package
    /// name with destinations relative to that package's data directory.
    pub fn copy_config_data_entries<'a, I>(
        &mut self,
        entries: I,
    ) -> Result<(ConfigDataEntries, DepSet)>
    where
        I: IntoIterator<Item = &'a FileEntry>,
    {
        let mut by_package: BTreeMap<String, Vec<FileEntry>> = BTreeMap::new();
        let unique: BTreeSet<&FileEntry> = entries.into_iter().collect();
        for entry in unique {
            let (package, rest) = split_config_data_destination(&entry.destination)?;
            by_package
                .entry(package)
                .or_default()
                .push(FileEntry::new(entry.source.clone(), rest));
        }

        let mut config_data = ConfigDataEntries::new();
        let mut deps = DepSet::new();
        for (package, entries) in by_package {
            let subdirectory = Path::new(CONFIG_DATA_DIR).join(&package);
            let (copied, copied_deps) = self.copy_file_entries(&entries, &subdirectory)?;
            deps.extend(copied_deps);
            config_data
                .entry(package)
                .or_default()
                .extend(copied);
        }
        Ok((config_data, deps))
    }

    /// Copy a kernel image to `kernel/<file name>`, returning the
    /// bundle-relative path and the path read.
    pub fn copy_kernel(&mut self, source: &Path) -> Result<(PathBuf, PathBuf)> {
        let file_name = file_name_of(source).ok_or_else(|| AibError::MissingFileName {
            path: source.display().to_string(),
        })?;
        let bundle_path = Path::new(KERNEL_DIR).join(file_name);
        let dep = self.copy(source, &bundle_path)?;
        Ok((bundle_path, dep))
    }
}

/// Split `meta/data/<package>/<rest>` into the package name and `<rest>`.
fn split_config_data_destination(destination: &Path) -> Result<(String, PathBuf)> {
    let invalid = || AibError::InvalidConfigDataDestination {
        destination: destination.display().to_string(),
    };

    let mut components = destination.components();
    let prefix_ok = matches!(components.next(), Some(Component::Normal(c)) if c == "meta")
        && matches!(components.next(), Some(Component::Normal(c)) if c == "data");
    if !prefix_ok {
        return Err(invalid());
    }

    let package = match components.next() {
        Some(Component::Normal(name)) => name.to_string_lossy().into_owned(),
        _ => return Err(invalid()),
    };
    if !is_safe_component(&package) {
        return Err(invalid());
    }

    let rest: PathBuf = components.collect();
    if !is_contained_relative(&rest) {
        return Err(invalid());
    }
    Ok((package, rest))
}
