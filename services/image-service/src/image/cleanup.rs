//! Cleanup guard for an ingestion attempt.
//!
//! Always unmounts and removes the scratch mount directory. On failure it
//! also rolls back the destination path. The guard runs from `Drop` too,
//! so an attempt that unwinds still releases its mount.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use super::error::IngestError;
use super::mount::MountManager;

pub struct CleanupGuard {
    mounts: MountManager,
    mount_point: PathBuf,
    destination: PathBuf,
    done: bool,
}

impl CleanupGuard {
    pub fn new(mounts: MountManager, mount_point: PathBuf, destination: PathBuf) -> Self {
        Self {
            mounts,
            mount_point,
            destination,
            done: false,
        }
    }

    /// Run cleanup for `result` and hand it back unchanged.
    pub fn finish<T>(mut self, result: Result<T, IngestError>) -> Result<T, IngestError> {
        self.run(result.as_ref().err());
        result
    }

    fn run(&mut self, failure: Option<&IngestError>) {
        if self.done {
            return;
        }
        self.done = true;

        self.mounts.unmount(&self.mount_point);
        remove_dir_completely(&self.mount_point);

        if let Some(err) = failure {
            remove_dir_completely(&self.destination);
            error!(
                reason = %err,
                reason_code = err.reason_code(),
                destination = %self.destination.display(),
                "image ingestion failed"
            );
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                mount_point = %self.mount_point.display(),
                "ingestion aborted before completion, rolling back"
            );
            let aborted = IngestError::Unexpected("ingestion aborted".to_string());
            self.run(Some(&aborted));
        }
    }
}

/// Recursively remove `path` if it is a directory. Failures are logged.
pub fn remove_dir_completely(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not remove directory");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::mount::FakeMountDriver;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf, MountManager) {
        let root = tempdir().unwrap();
        let mount_point = root.path().join("mnt/uuid");
        let destination = root.path().join("repo/base/uuid");
        fs::create_dir_all(&mount_point).unwrap();
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("partial"), "").unwrap();
        let mounts = MountManager::new(Arc::new(FakeMountDriver::new()));
        (root, mount_point, destination, mounts)
    }

    #[test]
    fn test_success_keeps_destination() {
        let (_root, mount_point, destination, mounts) = setup();
        let guard = CleanupGuard::new(mounts, mount_point.clone(), destination.clone());

        let result: Result<u32, IngestError> = guard.finish(Ok(7));
        assert_eq!(result.unwrap(), 7);
        assert!(!mount_point.exists());
        assert!(destination.join("partial").exists());
    }

    #[test]
    fn test_failure_rolls_back_and_preserves_error() {
        let (_root, mount_point, destination, mounts) = setup();
        let guard = CleanupGuard::new(mounts, mount_point.clone(), destination.clone());

        let result: Result<(), IngestError> =
            guard.finish(Err(IngestError::Copy {
                path: destination.clone(),
                detail: "disk full".to_string(),
            }));

        let err = result.unwrap_err();
        assert_eq!(err.reason_code(), "copy_failed");
        assert!(err.to_string().contains("disk full"));
        assert!(!mount_point.exists());
        assert!(!destination.exists());
    }

    #[test]
    fn test_drop_rolls_back() {
        let (_root, mount_point, destination, mounts) = setup();
        {
            let _guard = CleanupGuard::new(mounts, mount_point.clone(), destination.clone());
        }
        assert!(!mount_point.exists());
        assert!(!destination.exists());
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let root = tempdir().unwrap();
        assert!(remove_dir_completely(&root.path().join("absent")));
    }
}
