//! Error types and handling for Assembly Input Bundle creation
//!
//! Uses `thiserror` for error definitions and `miette` for pretty diagnostics.
//! Every error is fatal to the build that raised it: nothing in this crate
//! retries or recovers locally.

use miette::Diagnostic;
use thiserror::Error;

/// Main error type for bundle creation
#[derive(Error, Diagnostic, Debug)]
pub enum AibError {
    // Package errors
    #[error("Duplicate package manifest: {path}")]
    #[diagnostic(
        code(aib::package::duplicate_manifest),
        help("Each package manifest may only be declared once, in a single package set")
    )]
    DuplicatePackageManifest { path: String },

    #[error("Duplicate package name '{name}': {existing} and {new}")]
    #[diagnostic(
        code(aib::package::duplicate_name),
        help("Two different package manifests declare the same package name")
    )]
    DuplicatePackageName {
        name: String,
        existing: String,
        new: String,
    },

    #[error("There is a duplicate declaration of {url} in {set}")]
    #[diagnostic(
        code(aib::package::duplicate_url),
        help("A package URL may only be provided by one package manifest, across all package sets")
    )]
    DuplicatePackageUrl { url: String, set: String },

    // Package manifest errors
    #[error("Failed to parse package manifest: {path}: {reason}")]
    #[diagnostic(code(aib::manifest::parse_failed))]
    ManifestParseFailed { path: String, reason: String },

    #[error("Invalid package manifest: {path}: {reason}")]
    #[diagnostic(code(aib::manifest::invalid))]
    InvalidManifest { path: String, reason: String },

    // Compiled package errors
    #[error(
        "Include file already exists with a different source: {destination} \
         ({existing_source} vs {new_source})"
    )]
    #[diagnostic(
        code(aib::compiled::inconsistent_include),
        help("Component include paths must map to the same source file in every compiled package")
    )]
    InconsistentInclude {
        destination: String,
        existing_source: String,
        new_source: String,
    },

    // Layout errors
    #[error("Found an unexpected config data destination path: {destination}")]
    #[diagnostic(
        code(aib::config_data::invalid_destination),
        help("Config data destinations must have the form meta/data/<package>/<path/to/file>")
    )]
    InvalidConfigDataDestination { destination: String },

    #[error(
        "Conflicting sources for bundle path {destination}: {existing_source} and {new_source}"
    )]
    #[diagnostic(code(aib::layout::conflicting_destination))]
    ConflictingDestination {
        destination: String,
        existing_source: String,
        new_source: String,
    },

    #[error("Destination is not a relative path inside the bundle: {destination}")]
    #[diagnostic(code(aib::layout::invalid_destination))]
    InvalidDestination { destination: String },

    #[error("Path has no file name: {path}")]
    #[diagnostic(code(aib::layout::missing_file_name))]
    MissingFileName { path: String },

    #[error("Bundle validation failed: {message}")]
    #[diagnostic(code(aib::bundle::validation_failed))]
    BundleValidationFailed { message: String },

    // Configuration errors
    #[error("Failed to parse configuration file: {path}")]
    #[diagnostic(code(aib::config::parse_failed))]
    ConfigParseFailed { path: String, reason: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(aib::config::invalid))]
    ConfigInvalid { message: String },

    // File system errors
    #[error("Failed to copy {source_path} to {destination}")]
    #[diagnostic(code(aib::fs::copy_failed))]
    FileCopyFailed {
        source_path: String,
        destination: String,
        source: std::io::Error,
    },

    #[error("Failed to read file: {path}")]
    #[diagnostic(code(aib::fs::read_failed))]
    FileReadFailed { path: String, reason: String },

    #[error("Failed to write file: {path}")]
    #[diagnostic(code(aib::fs::write_failed))]
    FileWriteFailed { path: String, reason: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(aib::fs::io_error))]
    IoError { message: String },
}

impl AibError {
    /// Whether this error belongs to the duplicate-package class: the same
    /// manifest declared twice, two manifests at the same destination, or two
    /// manifests claiming the same package URL.
    pub fn is_duplicate_package(&self) -> bool {
        matches!(
            self,
            AibError::DuplicatePackageManifest { .. }
                | AibError::DuplicatePackageName { .. }
                | AibError::DuplicatePackageUrl { .. }
        )
    }

    /// The I/O error underneath a failed copy, if that's what this is.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            AibError::FileCopyFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AibError {
    fn from(err: std::io::Error) -> Self {
        AibError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AibError {
    fn from(err: serde_yaml::Error) -> Self {
        AibError::ConfigParseFailed {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AibError {
    fn from(err: serde_json::Error) -> Self {
        AibError::ConfigParseFailed {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, AibError>;
