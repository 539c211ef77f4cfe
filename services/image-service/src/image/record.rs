//! Image records and repository layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Image family. Each family lives under its own subdirectory of the
/// repository root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Base,
    MicroKernel,
    OsInstall,
}

impl ImageKind {
    /// Repository subdirectory for this family.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::MicroKernel => "mk",
            Self::OsInstall => "os",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "base" => Some(Self::Base),
            "mk" => Some(Self::MicroKernel),
            "os" => Some(Self::OsInstall),
            _ => None,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_prefix())
    }
}

impl FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_prefix(s).ok_or_else(|| format!("unknown image kind: {}", s))
    }
}

/// One ingested image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique identifier, supplied by the caller.
    pub uuid: Uuid,
    /// Basename of the source ISO.
    pub filename: String,
    /// Free-form description.
    pub description: String,
    /// Source size in bytes, filled in by the catalog layer.
    pub size: u64,
    /// Digest of the destination path listing. Only set after a
    /// successful ingestion.
    pub verification_hash: Option<String>,
    kind: ImageKind,
}

impl ImageRecord {
    /// Create an empty record for an image about to be ingested.
    pub fn new(kind: ImageKind, uuid: Uuid) -> Self {
        Self {
            uuid,
            filename: String::new(),
            description: String::new(),
            size: 0,
            verification_hash: None,
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn path_prefix(&self) -> &'static str {
        self.kind.path_prefix()
    }

    /// `<repository_root>/<path_prefix>/<uuid>`
    pub fn destination_path(&self, repository_root: &Path) -> PathBuf {
        repository_root
            .join(self.path_prefix())
            .join(self.uuid.to_string())
    }

    /// `<temp_root>/<uuid>`
    pub fn scratch_mount_path(&self, temp_root: &Path) -> PathBuf {
        temp_root.join(self.uuid.to_string())
    }
}
