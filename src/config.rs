//! Bundle inputs as a configuration file
//!
//! Everything a [`Builder`] takes can be described in one JSON or YAML file
//! (YAML for `.yaml`/`.yml`, JSON otherwise):
//!
//! ```yaml
//! outdir: out/obj/my_aib
//! packages:
//!   - package: obj/foo/package_manifest.json
//!     set: base
//! kernel:
//!   path: obj/kernel/kernel.zbi
//!   args: [kernel.serial=legacy]
//! config_data:
//!   - source: src/foo/config.json
//!     destination: meta/data/foo/config.json
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bundle::{DriverDetails, KernelInfo, PackageDetails, ShellCommands};
use crate::common::fs::read_to_string;
use crate::creator::{Builder, CompiledPackageDefinitionFromGn};
use crate::error::{AibError, Result};
use crate::file_entry::FileEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    pub outdir: PathBuf,
    pub packages: Vec<PackageDetails>,
    pub base_drivers: Vec<DriverDetails>,
    pub boot_drivers: Vec<DriverDetails>,
    pub shell_commands: ShellCommands,
    pub bootfs_shell_commands: ShellCommands,
    pub kernel: KernelInfo,
    pub boot_args: BTreeSet<String>,
    pub qemu_kernel: Option<PathBuf>,
    pub bootfs_files: BTreeSet<FileEntry>,
    pub bootfs_files_package: Option<PathBuf>,
    pub config_data: Vec<FileEntry>,
    pub compiled_packages: Vec<CompiledPackageDefinitionFromGn>,
    pub memory_buckets: BTreeSet<PathBuf>,
}

impl BuilderConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, picking the format by extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let parsed = if is_yaml {
            Self::from_yaml(&contents)
        } else {
            Self::from_json(&contents)
        };
        parsed.map_err(|e| match e {
            AibError::ConfigParseFailed { reason, .. } => AibError::ConfigParseFailed {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.outdir.as_os_str().is_empty() {
            return Err(AibError::ConfigInvalid {
                message: "outdir cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Builder {
    /// Create a builder with every input from `config`. Declaring the same
    /// package manifest twice is an error here, before anything is copied.
    pub fn from_config(config: BuilderConfig) -> Result<Self> {
        let mut builder = Builder::new(config.outdir);
        for package in config.packages {
            builder.add_package(package.package, package.set)?;
        }
        builder.base_drivers = config.base_drivers;
        builder.boot_drivers = config.boot_drivers;
        builder.shell_commands = config.shell_commands;
        builder.bootfs_shell_commands = config.bootfs_shell_commands;
        builder.kernel = config.kernel;
        builder.boot_args = config.boot_args;
        builder.qemu_kernel = config.qemu_kernel;
        builder.bootfs_files = config.bootfs_files;
        builder.bootfs_files_package = config.bootfs_files_package;
        builder.config_data = config.config_data;
        builder.compiled_packages = config.compiled_packages;
        builder.memory_buckets = config.memory_buckets;
        Ok(builder)
    }
}
