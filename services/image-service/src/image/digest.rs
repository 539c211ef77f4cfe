//! Verification hash over a directory tree's path listing.
//!
//! Only the set of relative paths is hashed, not file contents: a copy is
//! considered verified when every entry made it across.

use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::error::IngestError;

/// Relative paths of every entry below `dir`, in file-name-sorted
/// depth-first order.
///
/// Hidden entries (`.disk/info` and the like) are listed too. A shell-style
/// `**/*` glob skips them, so hashes from glob-based listings are not
/// comparable with [`dir_hash`].
pub fn relative_paths(dir: &Path) -> Result<Vec<String>, IngestError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| IngestError::Unexpected(e.to_string()))?;
        paths.push(relative.to_string_lossy().into_owned());
    }
    Ok(paths)
}

/// SHA-256 (hex) of the newline-joined relative path listing of `dir`.
pub fn dir_hash(dir: &Path) -> Result<String, IngestError> {
    let listing = relative_paths(dir)?.join("\n");
    Ok(hex::encode(Sha256::digest(listing.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn populate(dir: &Path, contents: &str) {
        fs::create_dir_all(dir.join("isolinux")).unwrap();
        fs::write(dir.join("isolinux/isolinux.bin"), contents).unwrap();
        fs::write(dir.join("vmlinuz"), contents).unwrap();
    }

    #[test]
    fn test_relative_paths_sorted() {
        let dir = tempdir().unwrap();
        populate(dir.path(), "x");

        let paths = relative_paths(dir.path()).unwrap();
        assert_eq!(paths, vec!["isolinux", "isolinux/isolinux.bin", "vmlinuz"]);
    }

    #[test]
    fn test_relative_paths_include_hidden_entries() {
        let dir = tempdir().unwrap();
        populate(dir.path(), "x");
        fs::create_dir_all(dir.path().join(".disk")).unwrap();
        fs::write(dir.path().join(".disk/info"), "label").unwrap();

        let paths = relative_paths(dir.path()).unwrap();
        assert_eq!(paths[..2], [".disk", ".disk/info"]);
        assert_eq!(paths.len(), 5);
    }

    #[test]
    fn test_hash_ignores_contents() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        populate(a.path(), "one");
        populate(b.path(), "completely different");

        assert_eq!(dir_hash(a.path()).unwrap(), dir_hash(b.path()).unwrap());
    }

    #[test]
    fn test_hash_detects_extra_entry() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        populate(a.path(), "x");
        populate(b.path(), "x");
        fs::write(b.path().join("injected"), "").unwrap();

        assert_ne!(dir_hash(a.path()).unwrap(), dir_hash(b.path()).unwrap());
    }

    #[test]
    fn test_empty_dir_hash() {
        let dir = tempdir().unwrap();
        // sha256 of the empty string
        assert_eq!(
            dir_hash(dir.path()).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
