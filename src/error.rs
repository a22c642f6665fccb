use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failure of a single pipeline stage. Every stage function returns
/// `Result<T, StageError>`; the orchestrator decides what to skip.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error(
        "no eligible product: {candidates} candidate(s), none sized within [{min_size}, {max_size}] bytes"
    )]
    NoEligibleProduct {
        candidates: usize,
        min_size: u64,
        max_size: u64,
    },

    #[error("index source returned {index} for {eligible} eligible product(s)")]
    IndexOutOfRange { index: usize, eligible: usize },

    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("KPI publish failed: {0}")]
    KpiPublish(String),

    #[error("CMS publish failed: {0}")]
    CmsPublish(String),
}

impl StageError {
    /// Stable kind label used in logs and metrics exports.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::CatalogUnavailable(_) => "CatalogUnavailable",
            StageError::NoEligibleProduct { .. } => "NoEligibleProduct",
            StageError::IndexOutOfRange { .. } => "IndexOutOfRange",
            StageError::DirectoryCreate { .. } => "DirectoryCreateError",
            StageError::Conversion(_) => "ConversionError",
            StageError::Upload { .. } => "UploadError",
            StageError::KpiPublish(_) => "KPIPublishError",
            StageError::CmsPublish(_) => "CmsPublishError",
        }
    }
}

/// Non-fatal problem hit during cleanup. Collected, logged, never escalated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CleanupWarning: {}: {}", self.path.display(), self.message)
    }
}
