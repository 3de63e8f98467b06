/*!
 * Error types for zipline
 */

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, ZipError>;

/// Unified error type for folder-zip operations
#[derive(Debug)]
pub enum ZipError {
    /// Failure enumerating objects under a prefix; aborts the whole operation
    Listing { prefix: String, message: String },

    /// Failure fetching one object's bytes; aborts the current fragment only
    Fetch { key: String, message: String },

    /// Failure persisting a fragment to the destination store
    Upload { key: String, message: String },

    /// Archive writer error (zip encoding, entry bookkeeping)
    Archive(String),

    /// Local I/O error (temp files, flush, delete)
    Io(io::Error),

    /// Invalid or incomplete configuration
    Config(String),

    /// Operation was cancelled at a suspension point
    Cancelled { operation: &'static str },
}

impl ZipError {
    /// Check if this error aborts the whole operation rather than one fragment
    pub fn is_fatal(&self) -> bool {
        match self {
            ZipError::Listing { .. } => true,
            ZipError::Config(_) => true,
            ZipError::Cancelled { .. } => true,

            // Scoped to a single fragment; prior fragments stand
            ZipError::Fetch { .. } => false,
            ZipError::Upload { .. } => false,
            ZipError::Archive(_) => false,
            ZipError::Io(_) => false,
        }
    }

    /// Check if this error came from cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ZipError::Cancelled { .. })
    }

    /// Get the object key associated with this error, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            ZipError::Fetch { key, .. } => Some(key),
            ZipError::Upload { key, .. } => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for ZipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipError::Listing { prefix, message } => {
                write!(f, "Listing failed for prefix '{}': {}", prefix, message)
            }
            ZipError::Fetch { key, message } => {
                write!(f, "Fetch failed for object '{}': {}", key, message)
            }
            ZipError::Upload { key, message } => {
                write!(f, "Upload failed for '{}': {}", key, message)
            }
            ZipError::Archive(msg) => {
                write!(f, "Archive error: {}", msg)
            }
            ZipError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            ZipError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            ZipError::Cancelled { operation } => {
                write!(f, "Operation cancelled during {}", operation)
            }
        }
    }
}

impl std::error::Error for ZipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ZipError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        ZipError::Io(err)
    }
}

impl From<zip::result::ZipError> for ZipError {
    fn from(err: zip::result::ZipError) -> Self {
        ZipError::Archive(err.to_string())
    }
}

impl From<serde_json::Error> for ZipError {
    fn from(err: serde_json::Error) -> Self {
        ZipError::Config(format!("JSON parse error: {}", err))
    }
}
