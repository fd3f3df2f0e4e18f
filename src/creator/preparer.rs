//! Copying declared packages and drivers, with package URL uniqueness
//!
//! A package URL (`<repository>/<name>`) may be provided by only one
//! manifest per build, whichever set it was declared in. This is separate
//! from the manifest path check done when packages are declared: that one
//! catches the same manifest listed twice, this one catches two different
//! manifests for the same package.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::bundle::{DriverDetails, PackageDetails, PackageSet};
use crate::error::{AibError, Result};
use crate::package_copier::PackageCopier;
use crate::package_manifest::PackageManifest;

/// Every package URL seen in one build, and the set that claimed it
#[derive(Debug, Default)]
pub(crate) struct PackageUrlRegistry {
    urls: BTreeMap<String, PackageSet>,
}

impl PackageUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the manifest's URL, failing if it was already recorded.
    pub fn validate(&mut self, manifest: &PackageManifest, set: PackageSet) -> Result<()> {
        let url = manifest.package_url();
        if let Some(first) = self.urls.get(&url) {
            debug!(url = %url, first = %first, second = %set, "duplicate package url");
            return Err(AibError::DuplicatePackageUrl {
                url,
                set: set.to_string(),
            });
        }
        self.urls.insert(url, set);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }
}

/// Check a manifest's URL against every URL seen so far, then copy it.
///
/// The URL is claimed before the copier sees the manifest, so two manifests
/// for one package are reported by URL and set.
fn claim_and_copy(
    copier: &mut PackageCopier,
    urls: &mut PackageUrlRegistry,
    manifest_path: &Path,
    set: PackageSet,
) -> Result<(PathBuf, PackageManifest)> {
    let manifest = PackageManifest::from_path(manifest_path)?;
    urls.validate(&manifest, set)?;
    let destination = copier.add_parsed_package(manifest_path, &manifest)?;
    Ok((destination, manifest))
}

/// Copy each package, in manifest path order, and return its details
/// pointing at the copied manifest.
pub(crate) fn prepare_packages(
    copier: &mut PackageCopier,
    urls: &mut PackageUrlRegistry,
    packages: &BTreeSet<PackageDetails>,
) -> Result<Vec<PackageDetails>> {
    let mut prepared = Vec::with_capacity(packages.len());
    for details in packages {
        let (destination, manifest) =
            claim_and_copy(copier, urls, &details.package, details.set)?;
        debug!(
            package = %manifest.name(),
            set = %details.set,
            destination = %destination.display(),
            "prepared package"
        );
        prepared.push(PackageDetails::new(destination, details.set));
    }
    Ok(prepared)
}

/// Copy each driver package, recording its URL against `set`. The result is
/// sorted; the driver component lists are kept as given.
pub(crate) fn prepare_drivers(
    copier: &mut PackageCopier,
    urls: &mut PackageUrlRegistry,
    drivers: &[DriverDetails],
    set: PackageSet,
) -> Result<Vec<DriverDetails>> {
    let mut sorted: Vec<&DriverDetails> = drivers.iter().collect();
    sorted.sort_by(|a, b| a.package.cmp(&b.package));

    let mut prepared = Vec::with_capacity(sorted.len());
    for driver in sorted {
        let (destination, manifest) = claim_and_copy(copier, urls, &driver.package, set)?;
        debug!(
            driver = %manifest.name(),
            set = %set,
            components = driver.components.len(),
            "prepared driver"
        );
        prepared.push(DriverDetails {
            package: destination,
            components: driver.components.clone(),
        });
    }
    prepared.sort();
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, file: &str, repository: &str, name: &str) -> PathBuf {
        let blob = dir.join(format!("{file}.blob"));
        fs::write(&blob, name).unwrap();
        let manifest = serde_json::json!({
            "version": "1",
            "repository": repository,
            "package": { "name": name, "version": "0" },
            "blobs": [
                { "source_path": blob, "path": "meta/", "merkle": format!("m{file}"), "size": 1 }
            ],
        });
        let path = dir.join(file).join("package_manifest.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, manifest.to_string()).unwrap();
        path
    }

    #[test]
    fn test_same_url_in_two_sets_is_duplicate() {
        let temp = TempDir::new().unwrap();
        let base = write_manifest(temp.path(), "base_foo", "fuchsia.com", "foo");
        let cache = write_manifest(temp.path(), "cache_foo", "fuchsia.com", "foo");

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let mut urls = PackageUrlRegistry::new();
        prepare_packages(
            &mut copier,
            &mut urls,
            &[PackageDetails::new(&base, PackageSet::Base)].into_iter().collect(),
        )
        .unwrap();

        let err = prepare_packages(
            &mut copier,
            &mut urls,
            &[PackageDetails::new(&cache, PackageSet::Cache)].into_iter().collect(),
        )
        .unwrap_err();

        assert!(matches!(err, AibError::DuplicatePackageUrl { .. }));
        assert_eq!(
            err.to_string(),
            "There is a duplicate declaration of fuchsia.com/foo in cache"
        );
    }

    #[test]
    fn test_same_name_in_other_repository_still_collides_in_bundle() {
        let temp = TempDir::new().unwrap();
        let first = write_manifest(temp.path(), "first", "fuchsia.com", "foo");
        let second = write_manifest(temp.path(), "second", "example.com", "foo");

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let mut urls = PackageUrlRegistry::new();
        let packages: BTreeSet<_> = [
            PackageDetails::new(&first, PackageSet::Base),
            PackageDetails::new(&second, PackageSet::Cache),
        ]
        .into_iter()
        .collect();
        let err = prepare_packages(&mut copier, &mut urls, &packages).unwrap_err();

        // Distinct URLs, but both would be written to packages/foo.
        assert!(matches!(err, AibError::DuplicatePackageName { .. }));
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_same_manifest_as_package_and_driver_is_duplicate_url() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(temp.path(), "drv", "fuchsia.com", "drv");

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let mut urls = PackageUrlRegistry::new();
        prepare_packages(
            &mut copier,
            &mut urls,
            &[PackageDetails::new(&manifest, PackageSet::Base)].into_iter().collect(),
        )
        .unwrap();
        let err = prepare_drivers(
            &mut copier,
            &mut urls,
            &[DriverDetails::new(&manifest, ["meta/drv.cm"])],
            PackageSet::Bootfs,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "There is a duplicate declaration of fuchsia.com/drv in bootfs"
        );
    }

    #[test]
    fn test_distinct_names_are_fine() {
        let temp = TempDir::new().unwrap();
        let foo = write_manifest(temp.path(), "foo", "fuchsia.com", "foo");
        let bar = write_manifest(temp.path(), "bar", "fuchsia.com", "bar");

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let mut urls = PackageUrlRegistry::new();
        let packages: BTreeSet<_> = [
            PackageDetails::new(&foo, PackageSet::Base),
            PackageDetails::new(&bar, PackageSet::Cache),
        ]
        .into_iter()
        .collect();
        let prepared = prepare_packages(&mut copier, &mut urls, &packages).unwrap();

        let destinations: Vec<_> = prepared.iter().map(|p| p.package.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                PathBuf::from("packages/bar/package_manifest.json"),
                PathBuf::from("packages/foo/package_manifest.json"),
            ]
        );
        assert_eq!(prepared[0].set, PackageSet::Cache);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_same_name_in_other_repository_is_fine() {
        let temp = TempDir::new().unwrap();
        let manifest = write_manifest(temp.path(), "foo", "fuchsia.com", "foo");
        let other = write_manifest(temp.path(), "other", "example.com", "foo");

        let mut urls = PackageUrlRegistry::new();
        urls.validate(&PackageManifest::from_path(&manifest).unwrap(), PackageSet::Base)
            .unwrap();
        urls.validate(&PackageManifest::from_path(&other).unwrap(), PackageSet::Base)
            .unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_drivers_sorted_by_destination() {
        let temp = TempDir::new().unwrap();
        let b = write_manifest(temp.path(), "b", "fuchsia.com", "b_drv");
        let a = write_manifest(temp.path(), "a", "fuchsia.com", "a_drv");

        let mut copier = PackageCopier::new(temp.path().join("aib"));
        let mut urls = PackageUrlRegistry::new();
        let drivers = vec![
            DriverDetails::new(&b, ["meta/b.cm"]),
            DriverDetails::new(&a, ["meta/a.cm"]),
        ];
        let prepared =
            prepare_drivers(&mut copier, &mut urls, &drivers, PackageSet::Base).unwrap();

        assert_eq!(
            prepared[0].package,
            PathBuf::from("packages/a_drv/package_manifest.json")
        );
        assert!(prepared[0].components.contains(Path::new("meta/a.cm")));
    }
}
