//! Ingestion pipeline: mount an ISO, copy it into the repository, verify.
//!
//! ```text
//! Validating -> Mounting -> Staging -> Copying -> Verifying -> Success | Failed
//!                                                                  |
//!                                                          CleanupGuard (always)
//! ```
//!
//! Every step is a hard gate. The first failure short-circuits to the
//! cleanup guard, which unmounts, removes the scratch mount directory and
//! rolls back the destination.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::cleanup::CleanupGuard;
use super::copy::{FsTreeCopier, TreeCopier};
use super::digest::dir_hash;
use super::error::IngestError;
use super::mount::{MountDriver, MountManager};
use super::record::ImageRecord;

/// Recognized image suffix. Compared literally against the end of the
/// file name (case-sensitive).
pub const ISO_EXTENSION: &str = ".iso";

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory holding per-image scratch mount points.
    pub temp_root: PathBuf,
}

/// Ingestion pipeline.
///
/// Attempts for different uuids share no state and may run in parallel.
/// Two attempts for the same source race on the mount check; callers that
/// need exclusion serialize per source path (see `ImageService`).
#[derive(Clone)]
pub struct Ingestor {
    mounts: MountManager,
    copier: Arc<dyn TreeCopier>,
    config: IngestConfig,
}

impl Ingestor {
    /// Create a pipeline over the given mount driver.
    pub fn new(driver: Arc<dyn MountDriver>, config: IngestConfig) -> Self {
        Self {
            mounts: MountManager::new(driver),
            copier: Arc::new(FsTreeCopier),
            config,
        }
    }

    /// Replace the tree copier.
    pub fn with_copier(mut self, copier: Arc<dyn TreeCopier>) -> Self {
        self.copier = copier;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn mounts(&self) -> &MountManager {
        &self.mounts
    }

    /// Ingest `source` into `<repository_root>/<prefix>/<uuid>`.
    ///
    /// On success `record.filename` and `record.verification_hash` are
    /// populated. On failure the destination has been removed and
    /// `verification_hash` is `None`.
    pub fn add(
        &self,
        record: &mut ImageRecord,
        source: &Path,
        repository_root: &Path,
    ) -> Result<(), IngestError> {
        record.verification_hash = None;

        let mount_point = record.scratch_mount_path(&self.config.temp_root);
        let destination = record.destination_path(repository_root);
        debug!(
            uuid = %record.uuid,
            mount_point = %mount_point.display(),
            destination = %destination.display(),
            "starting image ingestion"
        );

        let guard = CleanupGuard::new(self.mounts.clone(), mount_point.clone(), destination.clone());
        let result = self.run(record, source, &mount_point, &destination);
        let hash = guard.finish(result)?;

        info!(
            uuid = %record.uuid,
            filename = %record.filename,
            destination = %destination.display(),
            verification_hash = %hash,
            "image ingested"
        );
        record.verification_hash = Some(hash);
        Ok(())
    }

    fn run(
        &self,
        record: &mut ImageRecord,
        source: &Path,
        mount_point: &Path,
        destination: &Path,
    ) -> Result<String, IngestError> {
        // Validating
        let fullpath = resolve_source_path(source)?;
        record.filename = fullpath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(fullpath = %fullpath.display(), filename = %record.filename, "resolved source");

        if !fullpath.exists() {
            return Err(IngestError::NotFound(fullpath));
        }
        if !has_iso_extension(&record.filename) {
            return Err(IngestError::InvalidFormat(record.filename.clone()));
        }

        // Mounting
        if self.mounts.is_mounted(&fullpath, mount_point) {
            debug!(mount_point = %mount_point.display(), "source already mounted");
        } else if !self.mounts.mount(&fullpath, mount_point) {
            debug!(
                source = %fullpath.display(),
                mount_point = %mount_point.display(),
                "could not mount source image"
            );
            return Err(IngestError::Mount {
                source_path: fullpath,
                mount_point: mount_point.to_path_buf(),
            });
        }

        // Staging
        if destination.is_dir() {
            warn!(destination = %destination.display(), "removing existing image path");
            fs::remove_dir_all(destination)?;
        }
        if let Err(e) = fs::create_dir_all(destination) {
            debug!(destination = %destination.display(), error = %e, "cannot create image path");
            return Err(IngestError::Path {
                path: destination.to_path_buf(),
                detail: e.to_string(),
            });
        }

        // Copying
        if let Err(e) = self.copier.copy_tree(mount_point, destination) {
            debug!(destination = %destination.display(), error = %e, "cannot copy to image path");
            return Err(IngestError::Copy {
                path: destination.to_path_buf(),
                detail: e.to_string(),
            });
        }

        // Verifying
        let hash = dir_hash(destination)?;
        if dir_hash(mount_point)? != hash {
            debug!(destination = %destination.display(), "image copy failed verification");
            return Err(IngestError::Verification(destination.to_path_buf()));
        }

        Ok(hash)
    }
}

/// Absolute, lexically normalized form of `source`.
///
/// `.` and `..` components are collapsed without touching the filesystem,
/// so every spelling of one ISO compares equal against the mount table.
pub fn resolve_source_path(source: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(source)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// Exact, case-sensitive suffix check.
pub fn has_iso_extension(filename: &str) -> bool {
    filename.ends_with(ISO_EXTENSION)
}

/// Re-check an ingested image against its stored verification hash.
pub fn verify_image(record: &ImageRecord, repository_root: &Path) -> Result<(), IngestError> {
    let destination = record.destination_path(repository_root);
    if !destination.is_dir() {
        return Err(IngestError::NotFound(destination));
    }

    let expected = record
        .verification_hash
        .as_deref()
        .ok_or_else(|| IngestError::Verification(destination.clone()))?;

    if dir_hash(&destination)? != expected {
        error!(uuid = %record.uuid, destination = %destination.display(), "image failed verification");
        return Err(IngestError::Verification(destination));
    }

    debug!(uuid = %record.uuid, "image verified");
    Ok(())
}

/// Remove an ingested image from the repository.
pub fn remove_image(record: &ImageRecord, repository_root: &Path) -> Result<(), IngestError> {
    let destination = record.destination_path(repository_root);
    match fs::remove_dir_all(&destination) {
        Ok(()) => {
            info!(uuid = %record.uuid, destination = %destination.display(), "image removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
