//! Source control collaborator used to fetch remote overlays.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Fetches overlays into, and removes them from, the install directory.
///
/// Every operation is all-or-nothing from the caller's point of view.
#[async_trait]
pub trait Scm: Send + Sync {
    /// Clone `uri` into `destination`, returning the checked-out directory.
    async fn checkout(&self, uri: &str, media_type: &str, destination: &Path) -> Result<PathBuf>;

    /// Bring an existing checkout up to date with `uri`.
    async fn update(&self, path: &Path, media_type: &str, uri: &str) -> Result<()>;

    async fn delete(&self, path: &Path) -> Result<()>;
}

/// [`Scm`] backed by the `git` command line tool.
#[derive(Debug, Clone)]
pub struct GitScm {
    binary: PathBuf,
}
impl GitScm {
    pub const MEDIA_TYPE: &'static str = "git";

    /// Locate `git` on the `PATH`.
    pub fn detect() -> Result<Self> {
        let binary = which::which("git").or_raise(|| ErrorKind::Fetch("git executable not found".to_string()))?;
        tracing::trace!(git = %binary.display(), "discovered git");
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn ensure_supported(media_type: &str) -> Result<()> {
        if media_type != Self::MEDIA_TYPE {
            exn::bail!(ErrorKind::UnsupportedMediaType(media_type.to_string()));
        }
        Ok(())
    }

    async fn git<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.binary)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .or_raise(|| ErrorKind::Fetch(format!("unable to run {}", self.binary.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            exn::bail!(ErrorKind::Fetch(format!("git exited with {}: {}", output.status, stderr.trim())));
        }
        Ok(())
    }
}
#[async_trait]
impl Scm for GitScm {
    #[tracing::instrument(skip(self, destination), fields(destination = %destination.display()))]
    async fn checkout(&self, uri: &str, media_type: &str, destination: &Path) -> Result<PathBuf> {
        Self::ensure_supported(media_type)?;
        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            exn::bail!(ErrorKind::Fetch(format!("destination already exists: {}", destination.display())));
        }
        let clone = [OsStr::new("clone"), OsStr::new("--quiet"), OsStr::new("--"), OsStr::new(uri), destination.as_os_str()];
        self.git(clone).await?;
        Ok(destination.to_path_buf())
    }

    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    async fn update(&self, path: &Path, media_type: &str, uri: &str) -> Result<()> {
        Self::ensure_supported(media_type)?;
        let pull = [OsStr::new("-C"), path.as_os_str(), OsStr::new("pull"), OsStr::new("--quiet"), OsStr::new("--ff-only"), OsStr::new(uri)];
        self.git(pull).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }
}
