//! plfm-vt Image Service Library
//!
//! The image service ingests ISO images into the local image repository.
//! Each image is loop-mounted at a scratch path, copied into
//! `<repository_root>/<path_prefix>/<uuid>`, verified by its path listing,
//! and recorded in the image catalog.
//!
//! ## Modules
//!
//! - `image`: Mounting, copying, verification and cleanup
//! - `state`: Local SQLite image catalog
//! - `service`: Ingestion plus catalog, with per-source locking

pub mod config;
pub mod image;
pub mod logging;
pub mod service;
pub mod state;

// Re-export commonly used types
pub use image::{ImageKind, ImageRecord, IngestConfig, IngestError, Ingestor, SystemMountDriver};
pub use service::{ImageService, ServiceError};
