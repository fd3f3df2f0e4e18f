//! Assembly Input Bundle creation
//!
//! Gathers a product's packages, drivers, boot files, config data, compiled
//! package definitions and kernel images from a build output directory, and
//! hard-links them into a self-contained bundle directory described by
//! `assembly_config.json`. Package blobs are deduplicated by merkle, and
//! package manifests are rewritten to point into the bundle.
//!
//! ```no_run
//! use assembly_input_bundle::{Builder, PackageSet};
//!
//! # fn main() -> assembly_input_bundle::Result<()> {
//! let mut builder = Builder::new("out/obj/my_aib");
//! builder.add_package("obj/foo/package_manifest.json", PackageSet::Base)?;
//! let built = builder.build()?;
//! println!("{} inputs", built.deps.len());
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod common;
pub mod config;
pub mod creator;
pub mod depfile;
pub mod error;
pub mod file_entry;
pub mod package_copier;
pub mod package_manifest;
pub mod path_utils;

pub use bundle::{AssemblyInputBundle, DriverDetails, KernelInfo, PackageDetails, PackageSet};
pub use config::BuilderConfig;
pub use creator::{Builder, BuiltBundle, CompiledPackageDefinitionFromGn};
pub use depfile::{DepSet, write_depfile};
pub use error::{AibError, Result};
pub use file_entry::FileEntry;
pub use package_manifest::PackageManifest;
