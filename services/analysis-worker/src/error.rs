use std::fmt;
use std::time::Duration;
use thiserror::Error;

use sheetscan_utils::SheetscanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFailure {
    Timeout,
    Tool,
}

impl fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Tool => write!(f, "tool error"),
        }
    }
}

/// Everything that can stop a document from being analyzed.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Rate limited by {service}")]
    RateLimited { service: String },

    #[error("Unsupported file type received: {mime}")]
    UnsupportedFileType { mime: String },

    #[error("Document to PDF conversion {kind}: {detail}")]
    ConversionFailed {
        kind: ConversionFailure,
        detail: String,
    },

    #[error("Blob not found: {uri}")]
    ResourceNotFound { uri: String },

    #[error("File size {size} bytes exceeds maximum allowed size {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Maximum processing time exceeded after {elapsed:?}")]
    MaxProcessingTimeExceeded { elapsed: Duration },

    #[error("{0}")]
    Unexpected(String),
}

impl AnalysisError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Text stored in the `failed` marker.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::UnsupportedFileType { .. } => "Unsupported file type received".to_string(),
            Self::ConversionFailed { .. } => "Document to PDF conversion error".to_string(),
            Self::ResourceNotFound { .. } => "Blob not found".to_string(),
            Self::FileTooLarge { .. } => "File size exceeds maximum allowed size".to_string(),
            other => other.to_string(),
        }
    }

    /// The document keeps its `processing` marker and its message stays queued.
    pub fn keeps_claim(&self) -> bool {
        matches!(self, Self::MaxProcessingTimeExceeded { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::UnsupportedFileType { .. } => "unsupported_file_type",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::MaxProcessingTimeExceeded { .. } => "max_processing_time_exceeded",
            Self::Unexpected(_) => "unexpected",
        }
    }
}

/// Store errors never mean the source document is missing; only a
/// `DocumentSource` reports `ResourceNotFound`.
impl From<SheetscanError> for AnalysisError {
    fn from(error: SheetscanError) -> Self {
        match error {
            SheetscanError::NotFound { resource } => {
                Self::Unexpected(format!("Checkpoint data missing: {}", resource))
            }
            other => Self::Unexpected(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(error: std::io::Error) -> Self {
        Self::Unexpected(format!("I/O error: {}", error))
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(error: serde_json::Error) -> Self {
        Self::Unexpected(format!("JSON error: {}", error))
    }
}
