use super::Value;
use std::collections::BTreeMap;

/// A single object definition produced by loading a definition file.
///
/// This is the unit that gets materialized into the durable store. It is
/// pure data: no reference to the file it came from, no storage identity.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Definition {
    /// Registered kind this definition instantiates.
    pub kind: String,
    /// Optional label given after the kind in the source file.
    pub name: Option<String>,
    pub attributes: BTreeMap<String, Value>,
}
impl Definition {
    pub fn new(kind: impl Into<String>, name: Option<String>) -> Self {
        Self { kind: kind.into(), name, attributes: BTreeMap::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }
}
