//! Packages for Assembly to compile
//!
//! ```text
//! compiled_packages/include/<include path>
//! compiled_packages/<package>/<component>/<shard file name>
//! compiled_packages/<package>/files/<path in package>
//! ```
//!
//! Includes share one namespace across all compiled packages of a build, so
//! an include path must come from the same source file everywhere.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entries::FileEntryCopier;
use crate::bundle::{CompiledComponentDefinition, CompiledPackageDefinition};
use crate::depfile::DepSet;
use crate::error::{AibError, Result};
use crate::file_entry::FileEntry;
use crate::package_manifest::PackageManifest;
use crate::path_utils::{file_name_of, is_contained_relative, is_safe_component};

pub const COMPILED_PACKAGES_DIR: &str = "compiled_packages";
pub const INCLUDE_DIR: &str = "include";
pub const FILES_DIR: &str = "files";

/// A compiled package as described by the build, before its files are
/// copied into the bundle.
///
/// Unlike [`CompiledPackageDefinition`], includes keep their source path,
/// and whole packages can be listed whose files are added to `contents`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompiledPackageDefinitionFromGn {
    pub name: String,
    /// Package manifests whose files (other than the meta.far) go into
    /// this package
    #[serde(default)]
    pub packages: Vec<PathBuf>,
    #[serde(default)]
    pub components: Vec<CompiledComponentDefinition>,
    #[serde(default)]
    pub contents: BTreeSet<FileEntry>,
    #[serde(default)]
    pub component_includes: BTreeSet<FileEntry>,
    #[serde(default)]
    pub bootfs_package: bool,
}

/// Copy every compiled package's shards, includes and files, in name order.
pub(crate) fn copy_compiled_packages(
    files: &mut FileEntryCopier,
    packages: &[CompiledPackageDefinitionFromGn],
) -> Result<(Vec<CompiledPackageDefinition>, DepSet)> {
    let mut sorted: Vec<&CompiledPackageDefinitionFromGn> = packages.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut definitions = Vec::with_capacity(sorted.len());
    let mut deps = DepSet::new();
    for package in sorted {
        definitions.push(copy_compiled_package(files, package, &mut deps)?);
    }
    Ok((definitions, deps))
}

fn copy_compiled_package(
    files: &mut FileEntryCopier,
    package: &CompiledPackageDefinitionFromGn,
    deps: &mut DepSet,
) -> Result<CompiledPackageDefinition> {
    if !is_safe_component(&package.name) {
        return Err(AibError::ConfigInvalid {
            message: format!("invalid compiled package name '{}'", package.name),
        });
    }
    let package_dir = Path::new(COMPILED_PACKAGES_DIR).join(&package.name);

    let mut components = Vec::with_capacity(package.components.len());
    for component in &package.components {
        components.push(copy_component_shards(files, &package_dir, component, deps)?);
    }

    let includes = copy_component_includes(files, &package.component_includes, deps)?;

    let mut contents = package.contents.clone();
    for manifest_path in &package.packages {
        let manifest = PackageManifest::from_path(manifest_path)?;
        deps.insert(manifest_path.clone());
        contents.extend(manifest.content_blobs().map(|blob| {
            FileEntry::new(
                manifest.resolve_path(manifest_path, &blob.source_path),
                &blob.path,
            )
        }));
    }
    let (copied_contents, content_deps) =
        files.copy_file_entries(&contents, &package_dir.join(FILES_DIR))?;
    deps.extend(content_deps);

    debug!(
        package = %package.name,
        components = components.len(),
        includes = includes.len(),
        files = copied_contents.len(),
        "copied compiled package"
    );

    Ok(CompiledPackageDefinition {
        name: package.name.clone(),
        components,
        contents: copied_contents.into_iter().collect(),
        includes,
        bootfs_package: package.bootfs_package,
    })
}

fn copy_component_shards(
    files: &mut FileEntryCopier,
    package_dir: &Path,
    component: &CompiledComponentDefinition,
    deps: &mut DepSet,
) -> Result<CompiledComponentDefinition> {
    if !is_safe_component(&component.component_name) {
        return Err(AibError::ConfigInvalid {
            message: format!("invalid component name '{}'", component.component_name),
        });
    }
    let component_dir = package_dir.join(&component.component_name);

    let mut shards = BTreeSet::new();
    for shard in &component.shards {
        let file_name = file_name_of(shard).ok_or_else(|| AibError::MissingFileName {
            path: shard.display().to_string(),
        })?;
        let destination = component_dir.join(file_name);
        deps.insert(files.copy(shard, &destination)?);
        shards.insert(destination);
    }

    Ok(CompiledComponentDefinition {
        component_name: component.component_name.clone(),
        shards,
    })
}

/// Copy includes to `compiled_packages/include/<destination>`, returning the
/// bundle paths. An include path already copied from a different source, by
/// this or any earlier compiled package, is an error.
fn copy_component_includes(
    files: &mut FileEntryCopier,
    includes: &BTreeSet<FileEntry>,
    deps: &mut DepSet,
) -> Result<BTreeSet<PathBuf>> {
    let include_dir = Path::new(COMPILED_PACKAGES_DIR).join(INCLUDE_DIR);

    let mut copied = BTreeSet::new();
    for include in includes {
        if !is_contained_relative(&include.destination) {
            return Err(AibError::InvalidDestination {
                destination: include.destination.display().to_string(),
            });
        }
        let destination = include_dir.join(&include.destination);
        let dep = files.copy_or_else(&include.source, &destination, |existing| {
            AibError::InconsistentInclude {
                destination: destination.display().to_string(),
                existing_source: existing.display().to_string(),
                new_source: include.source.display().to_string(),
            }
        })?;
        deps.insert(dep);
        copied.insert(destination);
    }
    Ok(copied)
}
