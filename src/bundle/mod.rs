//! Assembly Input Bundles
//!
//! An Assembly Input Bundle (AIB) is a directory of build artifacts plus a
//! manifest, `assembly_config.json`, describing them. Every path in the
//! manifest is relative to the bundle directory, and every such path names a
//! file that was copied into it.
//!
//! ```text
//! assembly_config.json
//! packages/<package name>/package_manifest.json
//! subpackages/<meta.far merkle>
//! blobs/<merkle>
//! bootfs/<path in bootfs>
//! config_data/<package name>/<path in data dir>
//! compiled_packages/include/<path to include>
//! compiled_packages/<package>/<component>/<shard>
//! compiled_packages/<package>/files/<path in package>
//! memory_buckets/<bucket file>
//! kernel/<kernel image>
//! ```
//!
//! Every field of the manifest is optional, and collections are written in
//! sorted order.

pub mod types;
mod verify;

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::fs::{read_to_string, write_atomically};
use crate::error::{AibError, Result};
use crate::file_entry::FileEntry;
use crate::path_utils::relative_path;

pub use types::{
    CompiledComponentDefinition, CompiledPackageDefinition, DriverDetails, KernelInfo,
    PackageDetails, PackageSet,
};

/// File name of the bundle manifest, at the root of the bundle
pub const ASSEMBLY_CONFIG_NAME: &str = "assembly_config.json";

/// Config data entries, by the name of the package they are for
pub type ConfigDataEntries = BTreeMap<String, BTreeSet<FileEntry>>;

/// Shell commands, by the name of the package providing them
pub type ShellCommands = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssemblyInputBundle {
    pub kernel: KernelInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qemu_kernel: Option<PathBuf>,
    pub boot_args: BTreeSet<String>,
    pub bootfs_files: BTreeSet<FileEntry>,
    pub bootfs_packages: BTreeSet<PathBuf>,

    pub packages: BTreeSet<PackageDetails>,
    pub config_data: ConfigDataEntries,
    pub blobs: BTreeSet<PathBuf>,
    pub base_drivers: Vec<DriverDetails>,
    pub boot_drivers: Vec<DriverDetails>,
    pub bootfs_shell_commands: ShellCommands,
    pub shell_commands: ShellCommands,
    pub packages_to_compile: Vec<CompiledPackageDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootfs_files_package: Option<PathBuf>,
    pub memory_buckets: BTreeSet<PathBuf>,
}

impl AssemblyInputBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a bundle manifest from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AibError::ConfigParseFailed {
            path: ASSEMBLY_CONFIG_NAME.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a bundle manifest, either the file itself or the bundle
    /// directory containing it
    pub fn from_path(path: &Path) -> Result<Self> {
        let manifest_path = if path.is_dir() {
            path.join(ASSEMBLY_CONFIG_NAME)
        } else {
            path.to_path_buf()
        };
        let json = read_to_string(&manifest_path)?;
        serde_json::from_str(&json).map_err(|e| AibError::ConfigParseFailed {
            path: manifest_path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write `assembly_config.json` into `bundle_dir`, returning its path
    pub fn write_to(&self, bundle_dir: &Path) -> Result<PathBuf> {
        let path = bundle_dir.join(ASSEMBLY_CONFIG_NAME);
        write_atomically(&path, self.to_json()?.as_bytes())?;
        Ok(path)
    }

    /// Add packages, refusing any whose manifest path is already present,
    /// whatever set it was added to.
    pub fn add_packages(
        &mut self,
        packages: impl IntoIterator<Item = PackageDetails>,
    ) -> Result<()> {
        let mut packages: Vec<_> = packages.into_iter().collect();
        packages.sort();
        for details in packages {
            if self.packages.contains(&details) {
                return Err(AibError::DuplicatePackageManifest {
                    path: details.package.display().to_string(),
                });
            }
            self.packages.insert(details);
        }
        Ok(())
    }

    /// Every bundle-relative file path this manifest refers to, sorted.
    ///
    /// Subpackage manifests are not listed: they are only referenced from
    /// within package manifests.
    pub fn all_file_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();

        paths.extend(self.packages.iter().map(|p| p.package.clone()));
        paths.extend(self.base_drivers.iter().map(|d| d.package.clone()));
        paths.extend(self.boot_drivers.iter().map(|d| d.package.clone()));
        paths.extend(self.bootfs_files_package.iter().cloned());
        paths.extend(self.bootfs_packages.iter().cloned());
        paths.extend(self.bootfs_files.iter().map(|e| e.source.clone()));
        paths.extend(self.kernel.path.iter().cloned());
        paths.extend(self.qemu_kernel.iter().cloned());
        for entries in self.config_data.values() {
            paths.extend(entries.iter().map(|e| e.source.clone()));
        }
        paths.extend(self.blobs.iter().cloned());
        paths.extend(self.memory_buckets.iter().cloned());

        for package in &self.packages_to_compile {
            paths.extend(package.includes.iter().cloned());
            paths.extend(package.contents.iter().map(|e| e.source.clone()));
            for component in &package.components {
                paths.extend(component.shards.iter().cloned());
            }
        }

        paths
    }

    /// Write a fini manifest (`destination=source` lines) of every file in
    /// the bundle.
    ///
    /// Destinations are the bundle-relative paths. With no `base_dir`, the
    /// sources are the same paths. With a `base_dir`, sources are joined
    /// onto it, the manifest itself is listed too, and if `rebase` is given
    /// the sources are then made relative to `rebase`.
    pub fn write_fini_manifest<W: Write>(
        &self,
        writer: &mut W,
        base_dir: Option<&Path>,
        rebase: Option<&Path>,
    ) -> Result<()> {
        let file_paths = self.all_file_paths();

        let entries: Vec<FileEntry> = match base_dir {
            Some(base_dir) => {
                let source_for = |path: &Path| {
                    let joined = base_dir.join(path);
                    match rebase {
                        Some(rebase) => relative_path(&joined, rebase),
                        None => joined,
                    }
                };
                file_paths
                    .iter()
                    .chain(std::iter::once(&PathBuf::from(ASSEMBLY_CONFIG_NAME)))
                    .map(|path| FileEntry::new(source_for(path.as_path()), path.clone()))
                    .collect()
            }
            None => file_paths
                .iter()
                .map(|path| FileEntry::new(path.clone(), path.clone()))
                .collect(),
        };

        FileEntry::write_fini_manifest(&entries, writer)
    }
}
