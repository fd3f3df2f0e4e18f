//! Dependency sets and the Ninja/GN depfile format

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AibError, Result};
use crate::path_utils::to_forward_slashes;

/// Every filesystem path read while creating a bundle. Kept sorted so that
/// depfiles come out identical for identical inputs.
pub type DepSet = BTreeSet<PathBuf>;

fn escape(path: &Path) -> String {
    to_forward_slashes(path).replace(' ', "\\ ")
}

/// Write a depfile stating that `output` depends on every path in `deps`.
///
/// ```text
/// path/to/output: dep/one dep/two
/// ```
pub fn write_depfile<W: Write>(writer: &mut W, output: &Path, deps: &DepSet) -> Result<()> {
    let mut line = escape(output);
    line.push(':');
    for dep in deps {
        line.push(' ');
        line.push_str(&escape(dep));
    }
    writeln!(writer, "{line}").map_err(|e| AibError::FileWriteFailed {
        path: output.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_depfile_sorted() {
        let deps: DepSet = ["z/blob", "a/package_manifest.json"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let mut buf = Vec::new();
        write_depfile(&mut buf, Path::new("out/aib/assembly_config.json"), &deps).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "out/aib/assembly_config.json: a/package_manifest.json z/blob\n"
        );
    }

    #[test]
    fn test_write_depfile_escapes_spaces() {
        let deps: DepSet = std::iter::once(PathBuf::from("dir with space/file")).collect();
        let mut buf = Vec::new();
        write_depfile(&mut buf, Path::new("out"), &deps).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "out: dir\\ with\\ space/file\n"
        );
    }

    #[test]
    fn test_write_depfile_no_deps() {
        let mut buf = Vec::new();
        write_depfile(&mut buf, Path::new("out"), &DepSet::new()).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "out:\n");
    }
}
