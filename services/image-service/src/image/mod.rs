//! ISO image ingestion.
//!
//! This module handles:
//! - Loopback-mounting source ISOs at a scratch path
//! - Copying the mounted tree into the image repository
//! - Verifying the copy by its path listing
//! - Unmounting and rolling back regardless of outcome
//!
//! Repository layout: `<repository_root>/<path_prefix>/<uuid>`.

mod cleanup;
mod copy;
mod digest;
mod error;
mod ingest;
mod mount;
mod record;

pub use cleanup::CleanupGuard;
pub use copy::{FsTreeCopier, TreeCopier};
pub use digest::{dir_hash, relative_paths};
pub use error::{IngestError, IngestErrorKind};
pub use ingest::{
    has_iso_extension, remove_image, resolve_source_path, verify_image, IngestConfig, Ingestor,
    ISO_EXTENSION,
};
pub use mount::{
    parse_mount_table, FakeMountDriver, MountDriver, MountEntry, MountManager, SystemMountDriver,
};
pub use record::{ImageKind, ImageRecord};
