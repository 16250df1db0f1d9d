//! Loading of declarative object definition files.
//!
//! A definition file is a sequence of `let` constants and top-level blocks.
//! Each block names a registered [`Kind`] and produces one [`Definition`]:
//!
//! ```text
//! let HOST = "example.com"
//!
//! http_check "login" {
//!     url = "https://" + HOST + "/login"
//!     ports = [80, 443]
//!     options {
//!         retries = 3
//!     }
//! }
//! ```
//!
//! Loading never touches any store: [`Loader::load`] either returns every
//! definition in the file, all validated, or fails with a single error.

pub mod error;
mod eval;
mod kind;
mod lexer;
pub mod models;
mod parser;

use derive_more::Display;
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::eval::Evaluator;
pub use crate::kind::{Kind, KindRegistry};
use crate::lexer::Lexer;
pub use crate::models::{Definition, Value};
use crate::parser::Parser;

/// Line and column (both 1-based) within a definition file.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
#[display("{line}:{column}")]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// Parses, evaluates, and validates definition files against a fixed set of kinds.
#[derive(Debug, Clone)]
pub struct Loader {
    kinds: Arc<KindRegistry>,
}
impl Loader {
    pub fn new(kinds: KindRegistry) -> Self {
        Self { kinds: Arc::new(kinds) }
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Load definitions from source text.
    #[instrument(skip_all, fields(source_len = source.len()))]
    pub fn parse(&self, source: &str) -> Result<Vec<Definition>> {
        let tokens = Lexer::new(source).tokenize()?;
        let items = Parser::new(tokens).parse()?;
        let definitions = Evaluator::new(&self.kinds).evaluate(items)?;
        self.validate(&definitions)?;
        tracing::debug!(count = definitions.len(), "loaded definitions");
        Ok(definitions)
    }

    /// Load definitions from a file on disk.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<Definition>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        self.parse(&source)
    }

    /// Check every definition against its kind. Nothing is accepted unless
    /// everything is.
    pub fn validate(&self, definitions: &[Definition]) -> Result<()> {
        for definition in definitions {
            let kind = self
                .kinds
                .get(&definition.kind)
                .ok_or_raise(|| ErrorKind::Validation {
                    kind: definition.kind.clone(),
                    message: "kind is not registered".to_string(),
                })?;
            kind.validate(definition)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader() -> Loader {
        Loader::new(
            KindRegistry::default()
                .with(Kind::new("widget").require("content"))
                .with(Kind::new("gadget")),
        )
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# two definitions\nwidget {{ content = \"v1\" }}\ngadget \"g\" {{ }}").unwrap();

        let definitions = loader().load(file.path()).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0], Definition::new("widget", None).with_attribute("content", "v1"));
        assert_eq!(definitions[1], Definition::new("gadget", Some("g".to_string())));
    }

    #[test]
    fn test_empty_file_loads_nothing() {
        assert_eq!(loader().parse("# nothing here\n").unwrap(), Vec::new());
    }

    #[test]
    fn test_validation_rejects_whole_file() {
        let err = loader().parse("gadget { }\nwidget { }").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation { kind, .. } if kind == "widget"));
    }

    #[test]
    fn test_missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader().load(dir.path().join("absent.def")).unwrap_err();
        assert_eq!(err.tag(), "io");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position { line: 4, column: 12 }.to_string(), "4:12");
    }
}
