//! Configuration for the image service.

use std::path::PathBuf;

use anyhow::Result;

use crate::image::IngestConfig;

/// Image service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the image repository.
    pub repository_root: PathBuf,

    /// Directory for scratch mount points.
    pub temp_root: PathBuf,

    /// Path to the image catalog database.
    pub db_path: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let repository_root = std::env::var("GHOST_IMAGE_REPO_ROOT")
            .unwrap_or_else(|_| "/var/lib/ghost/images".to_string());

        let temp_root = std::env::var("GHOST_IMAGE_TEMP_ROOT")
            .unwrap_or_else(|_| "/var/lib/ghost/tmp/image-mounts".to_string());

        let db_path = std::env::var("GHOST_IMAGE_DB_PATH")
            .unwrap_or_else(|_| "/var/lib/ghost/images.db".to_string());

        let log_level = std::env::var("GHOST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            repository_root: PathBuf::from(repository_root),
            temp_root: PathBuf::from(temp_root),
            db_path: PathBuf::from(db_path),
            log_level,
        })
    }

    /// Pipeline settings derived from this configuration.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            temp_root: self.temp_root.clone(),
        }
    }
}
