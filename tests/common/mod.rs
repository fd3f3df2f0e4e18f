//! Common test utilities for bundle creation integration tests

use std::path::{Path, PathBuf};
use std::sync::Once;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

static INIT_TRACING: Once = Once::new();

/// Send library logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A scratch build directory with helpers to fabricate build outputs
pub struct TestWorkspace {
    /// Temporary directory
    #[allow(dead_code)]
    pub temp: TempDir,
    /// Path to workspace root
    pub path: PathBuf,
}

/// One blob of a fabricated package: (path in package, merkle, contents)
pub type TestBlob<'a> = (&'a str, &'a str, &'a str);

impl TestWorkspace {
    pub fn new() -> Self {
        init_tracing();
        let temp = TempDir::new().expect("Failed to create temp directory");
        let path = temp.path().to_path_buf();
        Self { temp, path }
    }

    /// The directory bundles are written to
    pub fn outdir(&self) -> PathBuf {
        self.path.join("out/aib")
    }

    /// Write a file in workspace, returning its full path
    pub fn write_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path.join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    /// Read a file from workspace
    #[allow(dead_code)]
    pub fn read_file(&self, path: &Path) -> String {
        std::fs::read_to_string(self.path.join(path)).expect("Failed to read file")
    }

    /// Write a package manifest under `obj/<dir>/` with a meta.far plus the
    /// given blobs, each blob's contents written next to it.
    pub fn write_package(&self, dir: &str, name: &str, blobs: &[TestBlob<'_>]) -> PathBuf {
        self.write_package_in_repository(dir, Some("fuchsia.com"), name, blobs)
    }

    /// Like [`Self::write_package`] but with no meta.far blob added
    #[allow(dead_code)]
    pub fn write_package_without_meta(
        &self,
        dir: &str,
        name: &str,
        blobs: &[TestBlob<'_>],
    ) -> PathBuf {
        self.write_manifest(dir, Some("fuchsia.com"), name, blobs)
    }

    pub fn write_package_in_repository(
        &self,
        dir: &str,
        repository: Option<&str>,
        name: &str,
        blobs: &[TestBlob<'_>],
    ) -> PathBuf {
        let meta_merkle = format!("meta_{dir}").replace('/', "_");
        let mut all_blobs: Vec<TestBlob<'_>> = vec![("meta/", meta_merkle.as_str(), name)];
        all_blobs.extend_from_slice(blobs);
        self.write_manifest(dir, repository, name, &all_blobs)
    }

    fn write_manifest(
        &self,
        dir: &str,
        repository: Option<&str>,
        name: &str,
        blobs: &[TestBlob<'_>],
    ) -> PathBuf {
        let blob_entries: Vec<_> = blobs
            .iter()
            .map(|(path, merkle, contents)| {
                let file = if *path == "meta/" {
                    "meta.far".to_string()
                } else {
                    format!("blobs/{path}")
                };
                let source = self.write_file(&format!("obj/{dir}/{file}"), contents);
                serde_json::json!({
                    "source_path": source,
                    "path": path,
                    "merkle": merkle,
                    "size": contents.len(),
                })
            })
            .collect();

        let mut manifest = serde_json::json!({
            "version": "1",
            "package": { "name": name, "version": "0" },
            "blobs": blob_entries,
        });
        if let Some(repository) = repository {
            manifest["repository"] = serde_json::json!(repository);
        }

        self.write_file(
            &format!("obj/{dir}/package_manifest.json"),
            &serde_json::to_string_pretty(&manifest).expect("Failed to serialize manifest"),
        )
    }
}

/// Every file under `root` with its contents, as sorted relative paths
#[allow(dead_code)]
pub fn snapshot_tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("walked path outside root")
                .to_path_buf();
            let contents = std::fs::read(entry.path()).expect("Failed to read file");
            (relative, contents)
        })
        .collect()
}
