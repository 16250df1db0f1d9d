//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults.
//! 2. `config.toml`, `config.yaml`, and `config.json` in the configuration
//!    directory (missing files are skipped).
//! 3. Environment variables prefixed with `WARDEN_`, with `__` separating
//!    nested keys (`WARDEN_LAYOUT__DEFINITIONS_DIR=defs`).

pub mod error;

use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::instrument;

use crate::error::{ErrorKind, Result};

const ENV_PREFIX: &str = "WARDEN_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "warden", "warden")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: Paths,
    pub layout: Layout,
}

/// Where things live on disk.
///
/// Everything except `data_dir` is optional; unset or relative values are
/// resolved against `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub data_dir: PathBuf,
    /// Destination directory for installed overlays.
    pub overlays_dir: Option<PathBuf>,
    /// Persisted overlay descriptor list.
    pub overlays_file: Option<PathBuf>,
    /// SQLite database holding materialized definitions.
    pub database: Option<PathBuf>,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            data_dir: project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".warden")),
            overlays_dir: None,
            overlays_file: None,
            database: None,
        }
    }
}
impl Paths {
    fn resolve(&self, value: Option<&Path>, default: &str) -> PathBuf {
        self.data_dir.join(value.unwrap_or(Path::new(default)))
    }

    pub fn overlays_dir(&self) -> PathBuf {
        self.resolve(self.overlays_dir.as_deref(), "overlays")
    }

    pub fn overlays_file(&self) -> PathBuf {
        self.resolve(self.overlays_file.as_deref(), "overlays.json")
    }

    pub fn database(&self) -> PathBuf {
        self.resolve(self.database.as_deref(), "store.sqlite")
    }
}

/// Names of the well-known files and directories inside an overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Directory holding definition files, relative to the overlay root.
    pub definitions_dir: String,
    /// File extension (without the dot) of definition files.
    pub definition_extension: String,
    /// Directory holding one sub-directory per extension.
    pub extensions_dir: String,
    /// Directory inside an extension that is added to the search path.
    pub lib_dir: String,
    /// Optional overlay metadata file, relative to the overlay root.
    pub metadata_file: String,
    /// Optional extension manifest, relative to an extension directory.
    pub manifest_file: String,
}
impl Default for Layout {
    fn default() -> Self {
        Self {
            definitions_dir: "objects".to_string(),
            definition_extension: "def".to_string(),
            extensions_dir: "extensions".to_string(),
            lib_dir: "lib".to_string(),
            metadata_file: "overlay.toml".to_string(),
            manifest_file: "extension.toml".to_string(),
        }
    }
}
impl Layout {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("layout.definitions_dir", &self.definitions_dir),
            ("layout.extensions_dir", &self.extensions_dir),
            ("layout.lib_dir", &self.lib_dir),
            ("layout.metadata_file", &self.metadata_file),
            ("layout.manifest_file", &self.manifest_file),
        ] {
            let mut components = Path::new(value).components();
            if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
                exn::bail!(ErrorKind::Invalid { field, reason: format!("{value:?} must be a single path component") });
            }
        }
        let extension = &self.definition_extension;
        if extension.is_empty() || extension.contains(['.', '/', '\\']) {
            exn::bail!(ErrorKind::Invalid {
                field: "layout.definition_extension",
                reason: format!("{extension:?} must be a bare extension without dots"),
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the platform configuration directory and the
    /// environment.
    pub fn load() -> Result<Self> {
        let dir = project_dirs().map(|dirs| dirs.config_dir().to_path_buf());
        Self::load_from(dir.as_deref())
    }

    /// Load configuration using `dir` as the configuration directory.
    #[instrument]
    pub fn load_from(dir: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(dir).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(data_dir = %config.paths.data_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// The layered provider, exposed so that embedders can merge in their
    /// own sources before extracting.
    pub fn figment(dir: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = dir {
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Configuration rooted at `data_dir` with default layout; no files or
    /// environment are consulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths { data_dir: data_dir.into(), ..Paths::default() },
            layout: Layout::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths.data_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid { field: "paths.data_dir", reason: "must not be empty".to_string() });
        }
        self.layout.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
        let layout = Layout::default();
        assert_eq!(layout.definitions_dir, "objects");
        assert_eq!(layout.definition_extension, "def");
    }

    #[test]
    fn test_derived_paths_follow_data_dir() {
        let mut config = Config::with_data_dir("/srv/warden");
        assert_eq!(config.paths.overlays_dir(), Path::new("/srv/warden/overlays"));
        assert_eq!(config.paths.database(), Path::new("/srv/warden/store.sqlite"));
        config.paths.overlays_file = Some(PathBuf::from("/etc/warden/overlays.json"));
        assert_eq!(config.paths.overlays_file(), Path::new("/etc/warden/overlays.json"));
    }

    #[test]
    fn test_file_layers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[paths]\ndata_dir = \"/data\"\n[layout]\ndefinitions_dir = \"defs\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"layout": {"definitions_dir": "objects2"}}"#).unwrap();

        let config: Config = Config::figment(Some(dir.path())).extract().unwrap();
        assert_eq!(config.paths.data_dir, Path::new("/data"));
        // Later layers win.
        assert_eq!(config.layout.definitions_dir, "objects2");
        assert_eq!(config.layout.lib_dir, "lib");
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    #[case("/abs")]
    fn test_invalid_layout_dirs(#[case] value: &str) {
        let mut config = Config::with_data_dir("/data");
        config.layout.definitions_dir = value.to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { field: "layout.definitions_dir", .. }));
    }

    #[rstest]
    #[case("")]
    #[case(".def")]
    #[case("tar.gz")]
    fn test_invalid_extension(#[case] value: &str) {
        let mut config = Config::with_data_dir("/data");
        config.layout.definition_extension = value.to_string();
        assert!(config.validate().is_err());
    }
}
