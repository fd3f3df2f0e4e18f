//! Entries that make up an Assembly Input Bundle manifest

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::file_entry::FileEntry;

/// The package set a package is declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSet {
    Base,
    Cache,
    Flexible,
    System,
    Bootfs,
    OnDemand,
}

impl PackageSet {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageSet::Base => "base",
            PackageSet::Cache => "cache",
            PackageSet::Flexible => "flexible",
            PackageSet::System => "system",
            PackageSet::Bootfs => "bootfs",
            PackageSet::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for PackageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A package manifest and the set it belongs to.
///
/// Equality, ordering and hashing only look at the manifest path, so the
/// same manifest declared in two sets is one package (and a duplicate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDetails {
    /// Path to the package manifest
    pub package: PathBuf,
    pub set: PackageSet,
}

impl PackageDetails {
    pub fn new(package: impl Into<PathBuf>, set: PackageSet) -> Self {
        Self {
            package: package.into(),
            set,
        }
    }
}

impl PartialEq for PackageDetails {
    fn eq(&self, other: &Self) -> bool {
        self.package == other.package
    }
}

impl Eq for PackageDetails {}

impl Hash for PackageDetails {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.package.hash(state);
    }
}

impl PartialOrd for PackageDetails {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageDetails {
    fn cmp(&self, other: &Self) -> Ordering {
        self.package.cmp(&other.package)
    }
}

/// A driver package, and the components inside it that are drivers
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverDetails {
    /// Path to the package manifest
    pub package: PathBuf,
    #[serde(default)]
    pub components: BTreeSet<PathBuf>,
}

impl DriverDetails {
    pub fn new<I, P>(package: impl Into<PathBuf>, components: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            package: package.into(),
            components: components.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub args: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_backstop: Option<u64>,
}

/// A component for Assembly to compile from shards
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompiledComponentDefinition {
    pub component_name: String,
    #[serde(default)]
    pub shards: BTreeSet<PathBuf>,
}

/// A package that Assembly creates itself, from component shards and files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompiledPackageDefinition {
    pub name: String,
    #[serde(default)]
    pub components: Vec<CompiledComponentDefinition>,
    /// Files other than component manifests to put in the package
    #[serde(default)]
    pub contents: BTreeSet<FileEntry>,
    /// CML files included by the component shards
    #[serde(default)]
    pub includes: BTreeSet<PathBuf>,
    /// Whether to extract the package's contents into bootfs
    #[serde(default)]
    pub bootfs_package: bool,
}
