//! Overlay Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::{Path, PathBuf};
use warden_store::Failure;

/// An overlay error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Registry Errors
/// Caller-visible and never retryable:
/// - [`ErrorKind::DuplicateName`]
/// - [`ErrorKind::NotFound`]
///
/// ### File-local Errors
/// - [`ErrorKind::Cache`] is caught at the file boundary during a scan and
///   reported per file; it only escapes when [`cache`](crate::CachedFile::cache)
///   is called directly.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("overlay already registered: {_0}")]
    DuplicateName(#[error(not(source))] String),
    #[display("overlay not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The SCM collaborator failed to fetch, update, or delete an overlay.
    #[display("unable to fetch overlay: {_0}")]
    Fetch(#[error(not(source))] String),
    #[display("unsupported media type: {_0}")]
    UnsupportedMediaType(#[error(not(source))] String),
    /// Update requested for an overlay that has no remote origin.
    #[display("overlay was not installed from a remote source: {_0}")]
    NotRemote(#[error(not(source))] String),
    #[display("cannot cache {}: {failure}", path.display())]
    Cache { path: PathBuf, failure: Failure },
    #[display("store error")]
    Store,
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    #[display("not an overlay directory: {}", _0.display())]
    InvalidOverlay(#[error(not(source))] PathBuf),
    #[display("invalid overlay metadata: {}", _0.display())]
    Metadata(#[error(not(source))] PathBuf),
    #[display("invalid overlay descriptor list: {}", _0.display())]
    Descriptors(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Wrap an I/O error encountered at `path`.
    #[track_caller]
    pub(crate) fn io(err: std::io::Error, path: &Path) -> Error {
        exn::Exn::<std::io::Error>::from(err).raise(ErrorKind::Io(path.to_path_buf()))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Store | Self::Io(_))
    }
}
