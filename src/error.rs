//! Warden Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A top-level error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for top-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which subsystem failed. The underlying error is the child frame.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("store error")]
    Store,
    #[display("overlay error")]
    Overlay,
    #[display("extension error")]
    Extension,
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    #[display("the process-wide instance is already initialized")]
    AlreadyInitialized,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store | Self::Io(_))
    }
}
