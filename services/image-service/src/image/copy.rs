//! Recursive tree copy from a scratch mount into the repository.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Copies the contents of one directory tree into another.
pub trait TreeCopier: Send + Sync {
    /// Copy everything below `source` into `dest`. `dest` already exists.
    fn copy_tree(&self, source: &Path, dest: &Path) -> io::Result<()>;
}

/// Filesystem copier: directories, regular files and symlinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsTreeCopier;

impl TreeCopier for FsTreeCopier {
    fn copy_tree(&self, source: &Path, dest: &Path) -> io::Result<()> {
        copy_dir_contents(source, dest)
    }
}

/// Copy the contents of `source` into `dest`, creating subdirectories as
/// needed.
pub fn copy_dir_contents(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
