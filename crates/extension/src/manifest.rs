use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Format, Toml};
use serde::Deserialize;
use std::path::Path;

/// Declarative part of an extension, read from each contributing directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub description: Option<String>,
    /// Names of extensions this one depends on, in declaration order.
    pub depends: Vec<String>,
}
impl Manifest {
    /// Read the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        Figment::from(Toml::file(path)).extract().or_raise(|| ErrorKind::Manifest(path.to_path_buf()))
    }

    /// Fold `other` (found later in discovery order) into `self`: the first
    /// description wins and dependencies are appended without repeats.
    pub fn merge(&mut self, other: Manifest) {
        if self.description.is_none() {
            self.description = other.description;
        }
        for dependency in other.depends {
            if !self.depends.contains(&dependency) {
                self.depends.push(dependency);
            }
        }
    }
}
