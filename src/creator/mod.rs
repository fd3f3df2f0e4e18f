//! Creating an Assembly Input Bundle from build outputs
//!
//! A [`Builder`] is filled in field by field with paths produced by the
//! build, then consumed by [`Builder::build`], which lays the bundle out in
//! its output directory:
//!
//! 1. The output directory is deleted and recreated.
//! 2. Packages and base/boot drivers are copied, with each package URL
//!    allowed only once across all of them.
//! 3. The bootfs files package is copied if it has any files.
//! 4. Memory buckets are copied.
//! 5. All package blobs are linked into `blobs/`, once per merkle.
//! 6. Bootfs files, kernel images, compiled packages and config data are
//!    copied.
//! 7. `assembly_config.json` is written.
//!
//! Any failure aborts the build and leaves the output directory as it is.

mod compiled;
mod entries;
mod preparer;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::bundle::{
    AssemblyInputBundle, DriverDetails, KernelInfo, PackageDetails, PackageSet, ShellCommands,
};
use crate::common::fs::reset_dir;
use crate::depfile::DepSet;
use crate::error::{AibError, Result};
use crate::file_entry::FileEntry;
use crate::package_copier::PackageCopier;
use crate::package_manifest::PackageManifest;
use crate::path_utils::file_name_of;

pub use compiled::{COMPILED_PACKAGES_DIR, CompiledPackageDefinitionFromGn};
pub use entries::{BOOTFS_DIR, CONFIG_DATA_DIR, KERNEL_DIR, MEMORY_BUCKETS_DIR};

use entries::FileEntryCopier;
use preparer::{PackageUrlRegistry, prepare_drivers, prepare_packages};

/// Everything [`Builder::build`] produces
#[derive(Debug)]
pub struct BuiltBundle {
    pub bundle: AssemblyInputBundle,
    /// Path of the written `assembly_config.json`
    pub manifest_path: PathBuf,
    /// Every path read while creating the bundle
    pub deps: DepSet,
}

/// Staging area for the inputs of one bundle
#[derive(Debug, Default)]
pub struct Builder {
    pub outdir: PathBuf,

    packages: BTreeSet<PackageDetails>,

    pub base_drivers: Vec<DriverDetails>,
    pub boot_drivers: Vec<DriverDetails>,

    pub shell_commands: ShellCommands,
    pub bootfs_shell_commands: ShellCommands,

    /// Kernel image, kernel args and clock backstop
    pub kernel: KernelInfo,
    pub boot_args: BTreeSet<String>,
    pub qemu_kernel: Option<PathBuf>,

    pub bootfs_files: BTreeSet<FileEntry>,
    /// A package of bootfs files; dropped from the bundle if it only has a
    /// meta.far
    pub bootfs_files_package: Option<PathBuf>,

    /// Entries whose destinations are `meta/data/<package>/<path>`
    pub config_data: Vec<FileEntry>,

    pub compiled_packages: Vec<CompiledPackageDefinitionFromGn>,
    pub memory_buckets: BTreeSet<PathBuf>,
}

/// State shared by all steps of one build
struct BuildContext {
    outdir: PathBuf,
    copier: PackageCopier,
    files: FileEntryCopier,
    urls: PackageUrlRegistry,
    deps: DepSet,
}

impl BuildContext {
    fn new(outdir: &Path) -> Self {
        Self {
            outdir: outdir.to_path_buf(),
            copier: PackageCopier::new(outdir),
            files: FileEntryCopier::new(outdir),
            urls: PackageUrlRegistry::new(),
            deps: DepSet::new(),
        }
    }
}

impl Builder {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            ..Self::default()
        }
    }

    /// Declare a package. A manifest path may only be declared once, in
    /// whatever set.
    pub fn add_package(&mut self, manifest: impl Into<PathBuf>, set: PackageSet) -> Result<()> {
        let details = PackageDetails::new(manifest, set);
        if self.packages.contains(&details) {
            return Err(AibError::DuplicatePackageManifest {
                path: details.package.display().to_string(),
            });
        }
        self.packages.insert(details);
        Ok(())
    }

    /// Packages declared so far, by manifest path
    pub fn packages(&self) -> impl Iterator<Item = &PackageDetails> {
        self.packages.iter()
    }

    /// Create the bundle in `outdir`.
    pub fn build(self) -> Result<BuiltBundle> {
        info!(
            outdir = %self.outdir.display(),
            packages = self.packages.len(),
            "creating assembly input bundle"
        );

        reset_dir(&self.outdir)?;
        let mut ctx = BuildContext::new(&self.outdir);
        let mut result = AssemblyInputBundle::new();

        result.boot_args = self.boot_args;
        result.kernel.args = self.kernel.args;
        result.kernel.clock_backstop = self.kernel.clock_backstop;

        let packages = prepare_packages(&mut ctx.copier, &mut ctx.urls, &self.packages)?;
        result.add_packages(packages)?;

        result.base_drivers = prepare_drivers(
            &mut ctx.copier,
            &mut ctx.urls,
            &self.base_drivers,
            PackageSet::Base,
        )?;
        result.boot_drivers = prepare_drivers(
            &mut ctx.copier,
            &mut ctx.urls,
            &self.boot_drivers,
            PackageSet::Bootfs,
        )?;

        if let Some(bootfs_files_package) = &self.bootfs_files_package {
            result.bootfs_files_package =
                copy_bootfs_files_package(&mut ctx, bootfs_files_package)?;
        }

        result.memory_buckets = copy_memory_buckets(&mut ctx, &self.memory_buckets)?;

        let (blobs, blob_deps) = ctx.copier.perform_copy()?;
        ctx.deps.extend(blob_deps);
        result.blobs = blobs.into_iter().collect();

        let (bootfs_files, bootfs_deps) = ctx
            .files
            .copy_file_entries(&self.bootfs_files, Path::new(BOOTFS_DIR))?;
        ctx.deps.extend(bootfs_deps);
        result.bootfs_files = bootfs_files.into_iter().collect();

        if let Some(kernel) = &self.kernel.path {
            let (bundle_path, dep) = ctx.files.copy_kernel(kernel)?;
            ctx.deps.insert(dep);
            result.kernel.path = Some(bundle_path);
        }
        if let Some(qemu_kernel) = &self.qemu_kernel {
            let (bundle_path, dep) = ctx.files.copy_kernel(qemu_kernel)?;
            ctx.deps.insert(dep);
            result.qemu_kernel = Some(bundle_path);
        }

        let (compiled, compiled_deps) =
            compiled::copy_compiled_packages(&mut ctx.files, &self.compiled_packages)?;
        ctx.deps.extend(compiled_deps);
        result.packages_to_compile = compiled;

        let (config_data, config_data_deps) =
            ctx.files.copy_config_data_entries(&self.config_data)?;
        ctx.deps.extend(config_data_deps);
        result.config_data = config_data;

        // Both maps are ordered by package name.
        result.shell_commands = self.shell_commands;
        result.bootfs_shell_commands = self.bootfs_shell_commands;

        let manifest_path = result.write_to(&ctx.outdir)?;
        info!(
            manifest = %manifest_path.display(),
            packages = result.packages.len(),
            package_urls = ctx.urls.len(),
            blobs = result.blobs.len(),
            deps = ctx.deps.len(),
            "created assembly input bundle"
        );

        Ok(BuiltBundle {
            bundle: result,
            manifest_path,
            deps: ctx.deps,
        })
    }
}

/// Copy the bootfs files package, unless it has nothing but a meta.far.
fn copy_bootfs_files_package(
    ctx: &mut BuildContext,
    manifest_path: &Path,
) -> Result<Option<PathBuf>> {
    ctx.deps.insert(manifest_path.to_path_buf());
    let manifest = PackageManifest::from_path(manifest_path)?;
    if !manifest.has_content_blobs() {
        debug!(manifest = %manifest_path.display(), "bootfs files package is empty, skipping");
        return Ok(None);
    }
    let (destination, _) = ctx.copier.add_package(manifest_path)?;
    Ok(Some(destination))
}

/// Copy each memory bucket file to `memory_buckets/<file name>`.
fn copy_memory_buckets(
    ctx: &mut BuildContext,
    memory_buckets: &BTreeSet<PathBuf>,
) -> Result<BTreeSet<PathBuf>> {
    let entries = memory_buckets
        .iter()
        .map(|source| {
            file_name_of(source)
                .map(|name| FileEntry::new(source.clone(), name))
                .ok_or_else(|| AibError::MissingFileName {
                    path: source.display().to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let (copied, deps) = ctx
        .files
        .copy_file_entries(&entries, Path::new(MEMORY_BUCKETS_DIR))?;
    ctx.deps.extend(deps);
    Ok(copied.into_iter().map(|entry| entry.source).collect())
}
