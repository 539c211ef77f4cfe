//! Error taxonomy for image ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single ingestion attempt.
///
/// Every variant is local to one attempt; none of them is fatal to the
/// caller. The message is what gets logged and reported back.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Source image does not exist.
    #[error("file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// Source file name does not carry the `.iso` suffix.
    #[error("file is not an ISO: {0}")]
    InvalidFormat(String),

    /// Loopback mount failed.
    #[error("could not mount {} on {}", source_path.display(), mount_point.display())]
    Mount {
        source_path: PathBuf,
        mount_point: PathBuf,
    },

    /// Destination path could not be created.
    #[error("cannot create image path {}: {detail}", path.display())]
    Path { path: PathBuf, detail: String },

    /// Copy from the scratch mount into the destination failed.
    #[error("cannot copy to image path {}: {detail}", path.display())]
    Copy { path: PathBuf, detail: String },

    /// Destination path listing does not match the mounted tree.
    #[error("image copy failed verification: {}", .0.display())]
    Verification(PathBuf),

    /// Any other fault raised while ingesting.
    #[error("{0}")]
    Unexpected(String),
}

/// Discriminant of [`IngestError`] for callers that branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorKind {
    NotFound,
    InvalidFormat,
    Mount,
    Path,
    Copy,
    Verification,
    Unexpected,
}

impl IngestError {
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            IngestError::NotFound(_) => IngestErrorKind::NotFound,
            IngestError::InvalidFormat(_) => IngestErrorKind::InvalidFormat,
            IngestError::Mount { .. } => IngestErrorKind::Mount,
            IngestError::Path { .. } => IngestErrorKind::Path,
            IngestError::Copy { .. } => IngestErrorKind::Copy,
            IngestError::Verification(_) => IngestErrorKind::Verification,
            IngestError::Unexpected(_) => IngestErrorKind::Unexpected,
        }
    }

    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self.kind() {
            IngestErrorKind::NotFound => "not_found",
            IngestErrorKind::InvalidFormat => "invalid_format",
            IngestErrorKind::Mount => "mount_failed",
            IngestErrorKind::Path => "path_failed",
            IngestErrorKind::Copy => "copy_failed",
            IngestErrorKind::Verification => "verification_failed",
            IngestErrorKind::Unexpected => "unexpected",
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Unexpected(err.to_string())
    }
}

impl From<walkdir::Error> for IngestError {
    fn from(err: walkdir::Error) -> Self {
        IngestError::Unexpected(err.to_string())
    }
}
