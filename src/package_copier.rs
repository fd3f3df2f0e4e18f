//! Content-addressed copying of packages into a bundle
//!
//! Package manifests are rewritten as soon as they are added, so that their
//! blob and subpackage paths point into the bundle. The blobs themselves are
//! only registered at that point, keyed by merkle, and are linked into
//! `blobs/` in one pass by [`PackageCopier::perform_copy`]. A blob shared by
//! any number of packages is linked exactly once.
//!
//! ```text
//! packages/<package name>/package_manifest.json
//! subpackages/<meta.far merkle>
//! blobs/<merkle>
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::common::fs::{fast_copy_makedirs, write_atomically};
use crate::depfile::DepSet;
use crate::error::{AibError, Result};
use crate::package_manifest::{META_FAR_PATH, PackageManifest, RelativeTo};
use crate::path_utils::relative_path;

pub const PACKAGES_DIR: &str = "packages";
pub const SUBPACKAGES_DIR: &str = "subpackages";
pub const BLOBS_DIR: &str = "blobs";
pub const PACKAGE_MANIFEST_NAME: &str = "package_manifest.json";

/// A subpackage manifest still to be copied: (meta.far merkle, source path)
type PendingSubpackage = (String, PathBuf);

#[derive(Debug)]
pub struct PackageCopier {
    outdir: PathBuf,

    /// Package name -> source manifest path
    packages: BTreeMap<String, PathBuf>,

    /// Subpackage meta.far merkle -> source manifest path
    subpackages: BTreeMap<String, PathBuf>,

    /// Merkle -> path the blob is read from
    blobs: BTreeMap<String, PathBuf>,

    /// Merkles of meta.far blobs, kept apart from content blobs
    meta_fars: BTreeSet<String>,

    /// Manifests read so far
    deps: DepSet,
}

impl PackageCopier {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            packages: BTreeMap::new(),
            subpackages: BTreeMap::new(),
            blobs: BTreeMap::new(),
            meta_fars: BTreeSet::new(),
            deps: DepSet::new(),
        }
    }

    /// The bundle-relative path a package's manifest is written to
    pub fn package_destination(package_name: &str) -> PathBuf {
        Path::new(PACKAGES_DIR)
            .join(package_name)
            .join(PACKAGE_MANIFEST_NAME)
    }

    /// Parse the manifest at `manifest_path` and add it with
    /// [`PackageCopier::add_parsed_package`].
    pub fn add_package(&mut self, manifest_path: &Path) -> Result<(PathBuf, PackageManifest)> {
        let manifest = PackageManifest::from_path(manifest_path)?;
        let destination = self.add_parsed_package(manifest_path, &manifest)?;
        Ok((destination, manifest))
    }

    /// Write the rewritten form of `manifest`, read from `manifest_path`,
    /// into the bundle (along with all of its subpackages), and register its
    /// blobs for copying.
    ///
    /// Returns the bundle-relative path of the rewritten manifest. Adding the
    /// same manifest path again returns the same destination; adding a
    /// different manifest for an already-added package name is an error.
    pub fn add_parsed_package(
        &mut self,
        manifest_path: &Path,
        manifest: &PackageManifest,
    ) -> Result<PathBuf> {
        let name = manifest.name().to_string();
        let destination = Self::package_destination(&name);

        if let Some(existing) = self.packages.get(&name) {
            if existing == manifest_path {
                return Ok(destination);
            }
            return Err(AibError::DuplicatePackageName {
                name,
                existing: existing.display().to_string(),
                new: manifest_path.display().to_string(),
            });
        }

        debug!(package = %name, manifest = %manifest_path.display(), "adding package");
        self.packages.insert(name, manifest_path.to_path_buf());
        self.deps.insert(manifest_path.to_path_buf());

        let pending = self.copy_manifest(manifest, manifest_path, &destination)?;
        self.copy_subpackages(pending)?;

        Ok(destination)
    }

    /// Write the rewritten manifest to `destination` (bundle-relative) and
    /// return the subpackages it references.
    fn copy_manifest(
        &mut self,
        manifest: &PackageManifest,
        manifest_path: &Path,
        destination: &Path,
    ) -> Result<Vec<PendingSubpackage>> {
        let destination_dir = destination.parent().unwrap_or_else(|| Path::new(""));

        let mut rewritten = manifest.clone();
        rewritten.blob_sources_relative = RelativeTo::File;

        for blob in &mut rewritten.blobs {
            let source = manifest.resolve_path(manifest_path, &blob.source_path);
            self.register_blob(&blob.merkle, source, blob.path == META_FAR_PATH);
            blob.source_path =
                relative_path(&Path::new(BLOBS_DIR).join(&blob.merkle), destination_dir);
        }

        let mut pending = Vec::with_capacity(rewritten.subpackages.len());
        for subpackage in &mut rewritten.subpackages {
            let source = manifest.resolve_path(manifest_path, &subpackage.manifest_path);
            pending.push((subpackage.merkle.clone(), source));
            subpackage.manifest_path = relative_path(
                &Path::new(SUBPACKAGES_DIR).join(&subpackage.merkle),
                destination_dir,
            );
        }

        let json = rewritten.to_json()?;
        write_atomically(&self.outdir.join(destination), json.as_bytes())?;
        Ok(pending)
    }

    /// Copy subpackage manifests depth-first, each at most once.
    fn copy_subpackages(&mut self, pending: Vec<PendingSubpackage>) -> Result<()> {
        let mut stack: Vec<PendingSubpackage> = pending.into_iter().rev().collect();

        while let Some((merkle, source)) = stack.pop() {
            if self.subpackages.contains_key(&merkle) {
                continue;
            }

            let manifest = PackageManifest::from_path(&source)?;
            debug!(
                subpackage = %manifest.name(),
                merkle = %merkle,
                manifest = %source.display(),
                "adding subpackage"
            );
            self.deps.insert(source.clone());
            self.subpackages.insert(merkle.clone(), source.clone());

            let destination = Path::new(SUBPACKAGES_DIR).join(&merkle);
            let nested = self.copy_manifest(&manifest, &source, &destination)?;
            stack.extend(nested.into_iter().rev());
        }

        Ok(())
    }

    fn register_blob(&mut self, merkle: &str, source: PathBuf, is_meta_far: bool) {
        if is_meta_far {
            self.meta_fars.insert(merkle.to_string());
        }
        match self.blobs.get(merkle) {
            Some(existing) if *existing != source => {
                debug!(
                    merkle,
                    kept = %existing.display(),
                    ignored = %source.display(),
                    "blob available from more than one source"
                );
            }
            Some(_) => {}
            None => {
                self.blobs.insert(merkle.to_string(), source);
            }
        }
    }

    /// Link every registered blob into `blobs/`, once per merkle.
    ///
    /// Returns the bundle-relative blob paths, sorted, and every path read
    /// while adding packages and copying their blobs. Registered blobs are
    /// consumed, so calling this again copies nothing new.
    pub fn perform_copy(&mut self) -> Result<(Vec<PathBuf>, DepSet)> {
        let blobs = std::mem::take(&mut self.blobs);
        let mut deps = std::mem::take(&mut self.deps);
        let mut copied = Vec::with_capacity(blobs.len());

        for (merkle, source) in blobs {
            let relative = Path::new(BLOBS_DIR).join(&merkle);
            deps.insert(fast_copy_makedirs(&source, &self.outdir.join(&relative))?);
            copied.push(relative);
        }

        info!(
            blobs = copied.len(),
            packages = self.packages.len(),
            subpackages = self.subpackages.len(),
            "copied package blobs"
        );
        Ok((copied, deps))
    }

    /// Merkles of every meta.far seen, including subpackages'
    pub fn meta_far_merkles(&self) -> &BTreeSet<String> {
        &self.meta_fars
    }

    /// Number of distinct blobs waiting to be copied
    pub fn pending_blob_count(&self) -> usize {
        self.blobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Write a blob and return its path
    fn write_blob(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join("inputs").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Write a manifest with absolute blob paths (working_dir relative)
    fn write_manifest(
        dir: &Path,
        name: &str,
        blobs: &[(&str, &str, &Path)],
        subpackages: &[(&str, &str, &Path)],
    ) -> PathBuf {
        let blobs: Vec<_> = blobs
            .iter()
            .map(|(path, merkle, source)| {
                serde_json::json!({
                    "source_path": source, "path": path, "merkle": merkle, "size": 1
                })
            })
            .collect();
        let subpackages: Vec<_> = subpackages
            .iter()
            .map(|(name, merkle, manifest)| {
                serde_json::json!({ "name": name, "merkle": merkle, "manifest_path": manifest })
            })
            .collect();
        let manifest = serde_json::json!({
            "version": "1",
            "repository": "fuchsia.com",
            "package": { "name": name, "version": "0" },
            "blobs": blobs,
            "subpackages": subpackages,
        });
        let path = dir.join("manifests").join(name).join("package_manifest.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_add_package_rewrites_manifest() {
        let temp = TempDir::new().unwrap();
        let outdir = temp.path().join("aib");
        let meta = write_blob(temp.path(), "a_meta.far", "meta");
        let bin = write_blob(temp.path(), "a_bin", "bin");
        let manifest_path = write_manifest(
            temp.path(),
            "pkg_a",
            &[("meta/", "ma", &meta), ("bin/a", "m1", &bin)],
            &[],
        );

        let mut copier = PackageCopier::new(&outdir);
        let (destination, manifest) = copier.add_package(&manifest_path).unwrap();

        assert_eq!(
            destination,
            PathBuf::from("packages/pkg_a/package_manifest.json")
        );
        assert_eq!(manifest.name(), "pkg_a");

        let written = PackageManifest::from_path(&outdir.join(&destination)).unwrap();
        assert_eq!(written.blob_sources_relative, RelativeTo::File);
        let sources: Vec<_> = written.blobs.iter().map(|b| b.source_path.clone()).collect();
        assert_eq!(
            sources,
            vec![
                PathBuf::from("../../blobs/ma"),
                PathBuf::from("../../blobs/m1")
            ]
        );
        assert!(copier.meta_far_merkles().contains("ma"));
        assert!(!copier.meta_far_merkles().contains("m1"));
    }

    #[test]
    fn test_blobs_deduplicated_across_packages() {
        let temp = TempDir::new().unwrap();
        let outdir = temp.path().join("aib");
        let shared = write_blob(temp.path(), "shared", "same bytes");
        let a = write_manifest(temp.path(), "a", &[("lib/x", "mshared", &shared)], &[]);
        let b = write_manifest(temp.path(), "b", &[("lib/y", "mshared", &shared)], &[]);
        let c = write_manifest(temp.path(), "c", &[("lib/z", "mshared", &shared)], &[]);

        let mut copier = PackageCopier::new(&outdir);
        for manifest in [&a, &b, &c] {
            copier.add_package(manifest).unwrap();
        }
        assert_eq!(copier.pending_blob_count(), 1);

        let (blobs, deps) = copier.perform_copy().unwrap();

        assert_eq!(blobs, vec![PathBuf::from("blobs/mshared")]);
        assert_eq!(fs::read_dir(outdir.join("blobs")).unwrap().count(), 1);
        assert!(deps.contains(&shared));
        assert!(deps.contains(&a) && deps.contains(&b) && deps.contains(&c));
    }

    #[test]
    fn test_same_manifest_twice_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let blob = write_blob(temp.path(), "blob", "x");
        let manifest = write_manifest(temp.path(), "a", &[("data", "m", &blob)], &[]);

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let (first, _) = copier.add_package(&manifest).unwrap();
        let (second, _) = copier.add_package(&manifest).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_different_manifest_same_name_is_duplicate() {
        let temp = TempDir::new().unwrap();
        let blob = write_blob(temp.path(), "blob", "x");
        let first = write_manifest(temp.path(), "a", &[("data", "m", &blob)], &[]);
        let second = temp.path().join("elsewhere/package_manifest.json");
        fs::create_dir_all(second.parent().unwrap()).unwrap();
        fs::copy(&first, &second).unwrap();

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        copier.add_package(&first).unwrap();
        let err = copier.add_package(&second).unwrap_err();

        assert!(matches!(err, AibError::DuplicatePackageName { .. }));
        assert!(err.is_duplicate_package());
    }

    #[test]
    fn test_subpackages_copied_once() {
        let temp = TempDir::new().unwrap();
        let outdir = temp.path().join("aib");
        let leaf_meta = write_blob(temp.path(), "leaf_meta", "leaf");
        let leaf = write_manifest(temp.path(), "leaf", &[("meta/", "mleaf", &leaf_meta)], &[]);
        let a_meta = write_blob(temp.path(), "a_meta", "a");
        let b_meta = write_blob(temp.path(), "b_meta", "b");
        let a = write_manifest(
            temp.path(),
            "a",
            &[("meta/", "ma", &a_meta)],
            &[("leaf", "mleaf", &leaf)],
        );
        let b = write_manifest(
            temp.path(),
            "b",
            &[("meta/", "mb", &b_meta)],
            &[("leaf", "mleaf", &leaf)],
        );

        let mut copier = PackageCopier::new(&outdir);
        copier.add_package(&a).unwrap();
        copier.add_package(&b).unwrap();
        let (blobs, deps) = copier.perform_copy().unwrap();

        assert_eq!(blobs.len(), 3);
        assert!(deps.contains(&leaf));

        let parent =
            PackageManifest::from_path(&outdir.join("packages/a/package_manifest.json")).unwrap();
        assert_eq!(
            parent.subpackages[0].manifest_path,
            PathBuf::from("../../subpackages/mleaf")
        );

        let copied_leaf = PackageManifest::from_path(&outdir.join("subpackages/mleaf")).unwrap();
        assert_eq!(
            copied_leaf.blobs[0].source_path,
            PathBuf::from("../blobs/mleaf")
        );
        assert!(copier.meta_far_merkles().contains("mleaf"));
    }

    #[test]
    fn test_nested_subpackages() {
        let temp = TempDir::new().unwrap();
        let outdir = temp.path().join("aib");
        let inner_meta = write_blob(temp.path(), "inner", "inner");
        let inner = write_manifest(temp.path(), "inner", &[("meta/", "mi", &inner_meta)], &[]);
        let middle_meta = write_blob(temp.path(), "middle", "middle");
        let middle = write_manifest(
            temp.path(),
            "middle",
            &[("meta/", "mm", &middle_meta)],
            &[("inner", "mi", &inner)],
        );
        let outer_meta = write_blob(temp.path(), "outer", "outer");
        let outer = write_manifest(
            temp.path(),
            "outer",
            &[("meta/", "mo", &outer_meta)],
            &[("middle", "mm", &middle)],
        );

        let mut copier = PackageCopier::new(&outdir);
        copier.add_package(&outer).unwrap();

        let middle_copy_path = outdir.join("subpackages/mm");
        let middle_copy = PackageManifest::from_path(&middle_copy_path).unwrap();
        let inner_reference = &middle_copy.subpackages[0].manifest_path;
        assert_eq!(*inner_reference, PathBuf::from("mi"));

        // The reference resolves next to the manifest that holds it.
        let resolved = middle_copy_path.parent().unwrap().join(inner_reference);
        assert_eq!(resolved, outdir.join("subpackages/mi"));
        assert!(resolved.is_file());
        let inner_copy = PackageManifest::from_path(&resolved).unwrap();
        assert_eq!(inner_copy.name(), "inner");
        assert_eq!(copier.pending_blob_count(), 3);
    }

    #[test]
    fn test_file_relative_sources_resolved() {
        let temp = TempDir::new().unwrap();
        let outdir = temp.path().join("aib");
        let pkg_dir = temp.path().join("obj/pkg");
        fs::create_dir_all(pkg_dir.join("bin")).unwrap();
        fs::write(pkg_dir.join("bin/tool"), "tool").unwrap();
        let manifest_path = pkg_dir.join("package_manifest.json");
        fs::write(
            &manifest_path,
            serde_json::json!({
                "version": "1",
                "package": { "name": "pkg", "version": "0" },
                "blobs": [
                    { "source_path": "bin/tool", "path": "bin/tool", "merkle": "mt", "size": 4 }
                ],
                "blob_sources_relative": "file",
            })
            .to_string(),
        )
        .unwrap();

        let mut copier = PackageCopier::new(&outdir);
        copier.add_package(&manifest_path).unwrap();
        let (_, deps) = copier.perform_copy().unwrap();

        assert!(deps.contains(&pkg_dir.join("bin/tool")));
        assert_eq!(
            fs::read_to_string(outdir.join("blobs/mt")).unwrap(),
            "tool"
        );
    }

    #[test]
    fn test_missing_blob_fails_copy() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("inputs/missing");
        let manifest = write_manifest(temp.path(), "a", &[("data", "m", &missing)], &[]);

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        copier.add_package(&manifest).unwrap();
        let err = copier.perform_copy().unwrap_err();

        assert_eq!(
            err.io_source().map(std::io::Error::kind),
            Some(std::io::ErrorKind::NotFound)
        );
    }
}
