//! Extension Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An extension error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extension operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle stage a hook belongs to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[display("setup")]
    Setup,
    #[display("teardown")]
    Teardown,
}

/// Actionable error categories.
///
/// ### Registry Errors
/// Caller-visible and never retryable:
/// - [`ErrorKind::DuplicateName`]
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::UnknownMember`]
/// - [`ErrorKind::DependencyCycle`]
///
/// ### Behaviour Errors
/// Raised around failures coming out of registered behaviour:
/// - [`ErrorKind::Hook`]
/// - [`ErrorKind::Action`]
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("extension already registered: {_0}")]
    DuplicateName(#[error(not(source))] String),
    /// No overlay contributes the extension and no behaviour is registered for it.
    #[display("extension not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Neither an action nor a dependency of the extension has this name.
    #[display("{extension} has no action or dependency named {member}")]
    UnknownMember { extension: String, member: String },
    /// Resolution chain that led back to an extension already being resolved.
    #[display("dependency cycle: {}", _0.join(" -> "))]
    DependencyCycle(#[error(not(source))] Vec<String>),
    #[display("{stage} hook failed for {extension}")]
    Hook { extension: String, stage: Stage },
    #[display("action {action} failed for {extension}")]
    Action { extension: String, action: String },
    #[display("invalid extension manifest: {}", _0.display())]
    Manifest(#[error(not(source))] PathBuf),
    /// Free-form failure raised by behaviour code.
    #[display("{_0}")]
    Behavior(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Hook { .. } | Self::Action { .. } | Self::Behavior(_))
    }
}
