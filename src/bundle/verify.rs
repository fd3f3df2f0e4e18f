//! Consistency checks of a bundle against the directory it lives in

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ASSEMBLY_CONFIG_NAME, AssemblyInputBundle};
use crate::error::{AibError, Result};
use crate::package_copier::SUBPACKAGES_DIR;
use crate::package_manifest::PackageManifest;
use crate::path_utils::{is_contained_relative, normalize, relative_path};

fn validation_error(message: String) -> AibError {
    AibError::BundleValidationFailed { message }
}

impl AssemblyInputBundle {
    /// Check that every path this bundle refers to is relative, stays inside
    /// the bundle, and names a file that exists under `bundle_dir`.
    ///
    /// Package manifests (including driver and bootfs-files packages) are
    /// followed too: their blobs and subpackage manifests must exist.
    pub fn verify(&self, bundle_dir: &Path) -> Result<()> {
        for path in self.all_file_paths() {
            if !is_contained_relative(&path) {
                return Err(validation_error(format!(
                    "{} is not a path inside the bundle",
                    path.display()
                )));
            }
            if !bundle_dir.join(&path).is_file() {
                return Err(validation_error(format!(
                    "{} is referenced but missing",
                    path.display()
                )));
            }
        }

        for manifest in self.package_manifest_paths() {
            verify_package(bundle_dir, &manifest)?;
        }
        Ok(())
    }

    /// Files under `bundle_dir` that nothing in the bundle refers to, as
    /// sorted bundle-relative paths.
    ///
    /// `assembly_config.json` itself and everything reachable from package
    /// manifests (blobs, subpackage manifests) count as referenced.
    pub fn unreferenced_files(&self, bundle_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut referenced = self.all_file_paths();
        referenced.insert(PathBuf::from(ASSEMBLY_CONFIG_NAME));
        for manifest in self.package_manifest_paths() {
            referenced.extend(package_closure(bundle_dir, &manifest)?);
        }

        let mut unreferenced = Vec::new();
        for entry in WalkDir::new(bundle_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| AibError::IoError {
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_path(entry.path(), bundle_dir);
            if !referenced.contains(&relative) {
                unreferenced.push(relative);
            }
        }
        unreferenced.sort();
        Ok(unreferenced)
    }

    fn package_manifest_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths: BTreeSet<PathBuf> =
            self.packages.iter().map(|p| p.package.clone()).collect();
        paths.extend(self.base_drivers.iter().map(|d| d.package.clone()));
        paths.extend(self.boot_drivers.iter().map(|d| d.package.clone()));
        paths.extend(self.bootfs_files_package.iter().cloned());
        paths.extend(self.bootfs_packages.iter().cloned());
        paths
    }
}

fn verify_package(bundle_dir: &Path, manifest: &Path) -> Result<()> {
    for path in package_closure(bundle_dir, manifest)? {
        if !is_contained_relative(&path) {
            return Err(validation_error(format!(
                "{} (referenced from {}) escapes the bundle",
                path.display(),
                manifest.display()
            )));
        }
        if !bundle_dir.join(&path).is_file() {
            return Err(validation_error(format!(
                "{} (referenced from {}) is missing",
                path.display(),
                manifest.display()
            )));
        }
    }
    Ok(())
}

/// Bundle-relative paths of every blob and subpackage manifest reachable
/// from the package manifest at `manifest` (itself bundle-relative).
fn package_closure(bundle_dir: &Path, manifest: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut found = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![manifest.to_path_buf()];

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let full_path = bundle_dir.join(&current);
        let parsed = PackageManifest::from_path(&full_path)?;

        for blob in &parsed.blobs {
            let resolved = parsed.resolve_path(&current, &blob.source_path);
            found.insert(normalize(&resolved));
        }
        for subpackage in &parsed.subpackages {
            let resolved = normalize(&parsed.resolve_path(&current, &subpackage.manifest_path));
            if !resolved.starts_with(SUBPACKAGES_DIR) {
                return Err(validation_error(format!(
                    "subpackage {} of {} is outside {SUBPACKAGES_DIR}/",
                    subpackage.name,
                    current.display()
                )));
            }
            found.insert(resolved.clone());
            stack.push(resolved);
        }
    }
    Ok(found)
}
