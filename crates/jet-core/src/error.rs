//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The requested access mode is not supported
    #[error("Unsupported access mode {mode:?} for {path}")]
    UnsupportedAccess {
        path: String,
        mode: crate::fs::AccessMode,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
