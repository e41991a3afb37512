//! Common error types for settingsync.

use thiserror::Error;

/// Top-level error type for settingsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote API or download failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Local file read or write failed.
    #[error("File system error: {0}")]
    FileSystem(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Add-on install, uninstall or unpack failed.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Remote rejected the credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The host cannot perform the requested operation.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The user declined to continue.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// User-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Network,
    FileSystem,
    Extension,
    Other,
}

impl ErrorKind {
    /// Configuration problems are shown as warnings, everything else as errors.
    pub fn is_warning(&self) -> bool {
        matches!(self, ErrorKind::Configuration)
    }
}

impl Error {
    /// Classify this error for display.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) | Error::InvalidInput(_) => ErrorKind::Configuration,
            Error::Network(_) | Error::Authentication(_) | Error::PermissionDenied(_) => {
                ErrorKind::Network
            }
            Error::FileSystem(_) | Error::Io(_) | Error::NotFound(_) | Error::AlreadyExists(_) => {
                ErrorKind::FileSystem
            }
            Error::Extension(_) => ErrorKind::Extension,
            Error::Serialization(_) | Error::NotSupported(_) | Error::Cancelled(_) => {
                ErrorKind::Other
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
