//! Definition Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

use crate::Position;

/// A definition error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for definition operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// The first three variants are load failures: the file is either parseable
/// and evaluable or it isn't, so none of them are worth retrying.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source text does not follow the definition grammar.
    #[display("syntax error at {position}: {message}")]
    Syntax { position: Position, message: String },
    /// A block or identifier referenced something that was never declared.
    #[display("undefined {symbol} `{name}` at {position}")]
    MissingSymbol {
        symbol: Symbol,
        name: String,
        position: Position,
    },
    /// Evaluation of an otherwise well-formed file failed.
    #[display("evaluation failed at {position}: {message}")]
    Runtime { position: Position, message: String },
    /// A definition was produced but is not acceptable for its kind.
    #[display("invalid `{kind}` definition: {message}")]
    Validation { kind: String, message: String },
    /// The definition file could not be read.
    #[display("unable to read definition file: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A kind name is not a valid identifier.
    #[display("invalid kind name: {_0}")]
    InvalidKind(#[error(not(source))] String),
    /// A kind with the same name is already registered.
    #[display("kind already registered: {_0}")]
    DuplicateKind(#[error(not(source))] String),
}

/// What sort of symbol a [`ErrorKind::MissingSymbol`] failed to resolve.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    #[display("kind")]
    Kind,
    #[display("constant")]
    Constant,
}

impl ErrorKind {
    /// Short, stable tag describing the failure category.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "syntax",
            Self::MissingSymbol { .. } => "missing-symbol",
            Self::Runtime { .. } => "runtime",
            Self::Validation { .. } => "validation",
            Self::Io(_) => "io",
            Self::InvalidKind(_) | Self::DuplicateKind(_) => "registry",
        }
    }

    /// Returns `true` if the error came from loading a file (as opposed to
    /// validating what it produced).
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::Syntax { .. } | Self::MissingSymbol { .. } | Self::Runtime { .. })
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
