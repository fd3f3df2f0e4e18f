//! Package manifest model
//!
//! A package manifest lists a package's identity, its blobs (content-addressed
//! files, identified by merkle) and the manifests of its subpackages.
//! Parsing is strict: unknown fields, an unsupported version, or names that
//! can't be used as path components are all rejected up front.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::fs::read_to_string;
use crate::error::{AibError, Result};
use crate::path_utils::is_safe_component;

/// The in-package path of the meta.far blob.
pub const META_FAR_PATH: &str = "meta/";

/// The only manifest version understood.
pub const MANIFEST_VERSION: &str = "1";

/// What relative `source_path`s (and subpackage `manifest_path`s) in a
/// manifest are relative to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeTo {
    /// The current working directory of whoever reads the manifest
    #[default]
    WorkingDir,
    /// The directory containing the manifest itself
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobEntry {
    /// Where the blob's bytes are read from
    pub source_path: PathBuf,
    /// Path of the blob within the package
    pub path: String,
    pub merkle: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubpackageEntry {
    pub name: String,
    /// Merkle of the subpackage's meta.far
    pub merkle: String,
    pub manifest_path: PathBuf,
}

/// ABI revisions are written either as an integer or as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AbiRevision {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageManifest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub package: PackageMetadata,
    pub blobs: Vec<BlobEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<SubpackageEntry>,
    #[serde(default, skip_serializing_if = "is_working_dir")]
    pub blob_sources_relative: RelativeTo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi_revision: Option<AbiRevision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_blob_type: Option<u32>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_working_dir(relative: &RelativeTo) -> bool {
    *relative == RelativeTo::WorkingDir
}

impl PackageManifest {
    /// Read and validate the manifest at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = read_to_string(path)?;
        Self::from_json(&json, path)
    }

    /// Parse and validate a manifest. `origin` is only used in error messages.
    pub fn from_json(json: &str, origin: &Path) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| AibError::ManifestParseFailed {
                path: origin.display().to_string(),
                reason: e.to_string(),
            })?;
        manifest.validate(origin)?;
        Ok(manifest)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    fn validate(&self, origin: &Path) -> Result<()> {
        let invalid = |reason: String| AibError::InvalidManifest {
            path: origin.display().to_string(),
            reason,
        };

        if self.version != MANIFEST_VERSION {
            return Err(invalid(format!(
                "unsupported manifest version '{}'",
                self.version
            )));
        }
        if !is_safe_component(&self.package.name) {
            return Err(invalid(format!(
                "invalid package name '{}'",
                self.package.name
            )));
        }
        for blob in &self.blobs {
            if blob.path.is_empty() {
                return Err(invalid(format!("blob {} has an empty path", blob.merkle)));
            }
            if !is_safe_component(&blob.merkle) {
                return Err(invalid(format!(
                    "invalid merkle '{}' for {}",
                    blob.merkle, blob.path
                )));
            }
        }
        for subpackage in &self.subpackages {
            if !is_safe_component(&subpackage.merkle) {
                return Err(invalid(format!(
                    "invalid merkle '{}' for subpackage {}",
                    subpackage.merkle, subpackage.name
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// The `<repository>/<package-name>` identity of this package. Without a
    /// repository, the package name alone.
    pub fn package_url(&self) -> String {
        match &self.repository {
            Some(repository) => format!("{repository}/{}", self.package.name),
            None => self.package.name.clone(),
        }
    }

    /// Blobs keyed by their path within the package
    pub fn blobs_by_path(&self) -> BTreeMap<&str, &BlobEntry> {
        self.blobs.iter().map(|b| (b.path.as_str(), b)).collect()
    }

    /// The meta.far blob, if the manifest lists one
    pub fn meta_far(&self) -> Option<&BlobEntry> {
        self.blobs.iter().find(|b| b.path == META_FAR_PATH)
    }

    /// Every blob except the meta.far
    pub fn content_blobs(&self) -> impl Iterator<Item = &BlobEntry> {
        self.blobs.iter().filter(|b| b.path != META_FAR_PATH)
    }

    pub fn has_content_blobs(&self) -> bool {
        self.content_blobs().next().is_some()
    }

    /// Resolve a path listed in this manifest (a blob source or subpackage
    /// manifest) given where the manifest itself was read from.
    pub fn resolve_path(&self, manifest_path: &Path, listed: &Path) -> PathBuf {
        match self.blob_sources_relative {
            RelativeTo::WorkingDir => listed.to_path_buf(),
            RelativeTo::File => manifest_path
                .parent()
                .map_or_else(|| listed.to_path_buf(), |dir| dir.join(listed)),
        }
    }
}
