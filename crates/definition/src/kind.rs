use crate::error::{ErrorKind, Result};
use crate::models::Definition;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(KIND_NAME_REGEX, r"^[a-z][a-z0-9_]*$");

/// A definition kind that blocks in a definition file may instantiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kind {
    name: String,
    required: Vec<String>,
}
impl Kind {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: Vec::new() }
    }

    /// Require an attribute on every definition of this kind.
    pub fn require(mut self, attribute: impl Into<String>) -> Self {
        self.required.push(attribute.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn validate(&self, definition: &Definition) -> Result<()> {
        if definition.kind != self.name {
            exn::bail!(ErrorKind::Validation {
                kind: self.name.clone(),
                message: format!("definition is of kind `{}`", definition.kind),
            });
        }
        if let Some(missing) = self.required.iter().find(|attr| !definition.attributes.contains_key(*attr)) {
            exn::bail!(ErrorKind::Validation {
                kind: self.name.clone(),
                message: format!("missing required attribute `{missing}`"),
            });
        }
        Ok(())
    }
}

/// The fixed set of kinds known to the program.
///
/// Populated once at start-up and then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, Kind>,
}
impl KindRegistry {
    pub fn register(&mut self, kind: Kind) -> Result<()> {
        if !KIND_NAME_REGEX.is_match(kind.name()) {
            exn::bail!(ErrorKind::InvalidKind(kind.name));
        }
        if self.kinds.contains_key(kind.name()) {
            exn::bail!(ErrorKind::DuplicateKind(kind.name));
        }
        self.kinds.insert(kind.name.clone(), kind);
        Ok(())
    }

    /// Builder form of [`KindRegistry::register`] for statically known kinds.
    ///
    /// # Panics
    /// When the kind name is invalid or already registered.
    pub fn with(mut self, kind: Kind) -> Self {
        if let Err(err) = self.register(kind) {
            panic!("{err:?}");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Kind> {
        self.kinds.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}
