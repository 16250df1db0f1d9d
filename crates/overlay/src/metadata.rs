use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct MetadataFile {
    title: Option<String>,
    license: Option<String>,
    source: Option<String>,
    source_view: Option<String>,
    website: Option<String>,
    description: Option<String>,
    maintainers: Vec<Maintainer>,
}

/// Descriptive information about an overlay.
///
/// Every field has a default, so an overlay without a metadata file is
/// fully usable, just unattributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Defaults to the overlay name.
    pub title: String,
    pub license: Option<String>,
    /// Defaults to the URI the overlay was installed from.
    pub source: Option<String>,
    /// Defaults to `source`.
    pub source_view: Option<String>,
    /// Defaults to `source_view`.
    pub website: Option<String>,
    pub maintainers: Vec<Maintainer>,
    pub description: Option<String>,
}
impl Metadata {
    /// Metadata made up entirely of defaults.
    pub fn unattributed(name: &str, uri: Option<&str>) -> Self {
        MetadataFile::default().resolve(name, uri)
    }

    /// Load metadata from `path`, which need not exist.
    pub fn load(path: &Path, name: &str, uri: Option<&str>) -> Result<Self> {
        let file: MetadataFile = Figment::from(Toml::file(path))
            .extract()
            .or_raise(|| ErrorKind::Metadata(path.to_path_buf()))?;
        Ok(file.resolve(name, uri))
    }
}
impl MetadataFile {
    fn resolve(self, name: &str, uri: Option<&str>) -> Metadata {
        let source = self.source.or_else(|| uri.map(str::to_string));
        let source_view = self.source_view.or_else(|| source.clone());
        let website = self.website.or_else(|| source_view.clone());
        Metadata {
            title: self.title.unwrap_or_else(|| name.to_string()),
            license: self.license,
            source,
            source_view,
            website,
            maintainers: self.maintainers,
            description: self.description,
        }
    }
}
