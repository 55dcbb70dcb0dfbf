//! Error types for streaming estimation and pyramid construction

use thiserror::Error;

/// Errors raised while planning streamed processing or building overviews
#[derive(Debug, Error)]
pub enum OvrError {
    /// Invalid source handle, unknown pixel type, inconsistent options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cannot open/create/seek/flush a file
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A tile read or write moved fewer bytes than one full tile
    #[error("Short tile {operation}: expected {expected} bytes, got {actual}")]
    ShortTile {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Container encoder/decoder failure
    #[error("TIFF error: {0}")]
    Tiff(String),

    /// Degenerate region for which no estimate can be produced
    #[error("Memory estimation failed: {0}")]
    MemoryEstimation(String),

    /// Cooperative cancellation requested by the caller
    #[error("Aborted by caller")]
    Aborted,
}

impl OvrError {
    /// Wrap an I/O error with what was being attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the error classes that end a build with partial output on disk
    #[must_use]
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ShortTile { .. } | Self::Tiff(_))
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<tiff::TiffError> for OvrError {
    fn from(e: tiff::TiffError) -> Self {
        match e {
            tiff::TiffError::IoError(io) => Self::io("accessing tiled container", io),
            other => Self::Tiff(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OvrError {
    fn from(e: serde_json::Error) -> Self {
        Self::Configuration(format!("invalid JSON: {e}"))
    }
}

/// Result type for this crate
pub type Result<T> = std::result::Result<T, OvrError>;
