use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::file::CachedFile;
use crate::overlay::{Overlay, ScanReport};
use crate::scm::Scm;
use crate::search::SearchPath;
use exn::{OptionExt, ResultExt};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;
use warden_config::Layout;

/// Persisted form of one registered overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub path: PathBuf,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}
impl Descriptor {
    /// Name the overlay is registered under: the last path component.
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// Name an overlay installed from `uri` is given: the last path segment,
/// without a trailing `.git`.
fn name_from_uri(uri: &str) -> Option<&str> {
    let trimmed = uri.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty() && name != "." && name != "..").then_some(name)
}

/// Every registered overlay, in registration order. Names are unique.
///
/// Overlays that are registered but cannot currently be opened (an unmounted
/// path, a malformed metadata file) are kept as dormant descriptors. They are
/// saved back unchanged and their definitions stay in the store until they
/// either open again or are [forgotten](Self::forget).
#[derive(Debug)]
pub struct OverlayCache {
    overlays: Vec<Overlay>,
    dormant: Vec<Descriptor>,
    descriptors_file: PathBuf,
    install_dir: PathBuf,
    layout: Layout,
}
impl OverlayCache {
    /// An empty registry that will save to `descriptors_file` and install
    /// remote overlays beneath `install_dir`.
    pub fn new(descriptors_file: impl Into<PathBuf>, install_dir: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            overlays: Vec::new(),
            dormant: Vec::new(),
            descriptors_file: descriptors_file.into(),
            install_dir: install_dir.into(),
            layout,
        }
    }

    /// Load the registry from its descriptor list, restoring each overlay's
    /// tracked files. A missing list is an empty registry. Descriptors whose
    /// overlay cannot be opened are kept dormant.
    #[instrument(skip_all, fields(file = %descriptors_file.as_ref().display()))]
    pub async fn load(
        descriptors_file: impl AsRef<Path>,
        install_dir: impl Into<PathBuf>,
        layout: Layout,
        ctx: &Context,
    ) -> Result<Self> {
        let descriptors_file = descriptors_file.as_ref();
        let mut cache = Self::new(descriptors_file, install_dir, layout);
        let descriptors: Vec<Descriptor> = match tokio::fs::read(descriptors_file).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Descriptors(descriptors_file.to_path_buf()))?
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(ErrorKind::io(err, descriptors_file)),
        };
        for descriptor in descriptors {
            let opened = Overlay::open(&descriptor.path, cache.layout.clone(), descriptor.media_type.clone(), descriptor.uri.clone()).await;
            let mut overlay = match opened {
                Ok(overlay) => overlay,
                Err(err) => {
                    tracing::warn!(path = %descriptor.path.display(), error = %*err, "overlay unavailable, keeping it dormant");
                    cache.dormant.push(descriptor);
                    continue;
                },
            };
            if cache.contains(overlay.name()) {
                tracing::warn!(name = overlay.name(), "skipping duplicate overlay");
                continue;
            }
            overlay.restore(ctx).await?;
            cache.overlays.push(overlay);
        }
        tracing::debug!(overlays = cache.overlays.len(), "loaded overlay registry");
        Ok(cache)
    }

    /// Rewrite the descriptor list wholesale. The previous list stays intact
    /// until the new one is complete.
    #[instrument(skip_all, fields(file = %self.descriptors_file.display()))]
    pub fn save(&self) -> Result<()> {
        let file = &self.descriptors_file;
        let parent = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
        let descriptors: Vec<Descriptor> =
            self.overlays.iter().map(Overlay::descriptor).chain(self.dormant.iter().cloned()).collect();
        let mut temp = tempfile::NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
        serde_json::to_writer_pretty(&mut temp, &descriptors).or_raise(|| ErrorKind::Descriptors(file.clone()))?;
        temp.flush().or_raise(|| ErrorKind::Io(file.clone()))?;
        temp.persist(file).or_raise(|| ErrorKind::Io(file.clone()))?;
        tracing::debug!(overlays = descriptors.len(), "saved overlay registry");
        Ok(())
    }

    pub fn descriptors_file(&self) -> &Path {
        &self.descriptors_file
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Whether `name` is registered, dormant or not.
    pub fn contains(&self, name: &str) -> bool {
        self.overlays.iter().any(|o| o.name() == name) || self.is_dormant(name)
    }

    pub fn is_dormant(&self, name: &str) -> bool {
        self.dormant.iter().any(|d| d.name() == Some(name))
    }

    /// Registered overlays that could not be opened at load time.
    pub fn dormant(&self) -> &[Descriptor] {
        &self.dormant
    }

    /// Unregister the dormant overlay `name`, deleting every definition and
    /// file record the store still holds for it.
    #[instrument(skip(self, ctx))]
    pub async fn forget(&mut self, name: &str, ctx: &Context) -> Result<Descriptor> {
        let index = self
            .dormant
            .iter()
            .position(|d| d.name() == Some(name))
            .ok_or_raise(|| ErrorKind::NotFound(name.to_string()))?;
        let records = ctx.store.files_for_overlay(name).await.or_raise(|| ErrorKind::Store)?;
        for record in records {
            CachedFile::from(record).expunge(ctx).await?;
        }
        tracing::info!("forgot dormant overlay");
        Ok(self.dormant.remove(index))
    }

    pub fn get(&self, name: &str) -> Result<&Overlay> {
        self.overlays.iter().find(|o| o.name() == name).ok_or_raise(|| ErrorKind::NotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Overlay> {
        self.overlays.iter_mut().find(|o| o.name() == name).ok_or_raise(|| ErrorKind::NotFound(name.to_string()))
    }

    /// Registered overlays, in registration order.
    pub fn list(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn names(&self) -> Vec<&str> {
        self.overlays.iter().map(Overlay::name).collect()
    }

    /// Register `overlay`. On [`DuplicateName`](ErrorKind::DuplicateName) the
    /// registry is left exactly as it was.
    pub fn add(&mut self, overlay: Overlay) -> Result<&mut Overlay> {
        if self.contains(overlay.name()) {
            exn::bail!(ErrorKind::DuplicateName(overlay.name().to_string()));
        }
        tracing::info!(name = overlay.name(), path = %overlay.path().display(), "added overlay");
        self.overlays.push(overlay);
        let index = self.overlays.len() - 1;
        Ok(&mut self.overlays[index])
    }

    /// Open the local overlay at `path` and register it.
    pub async fn add_path(&mut self, path: impl AsRef<Path>, ctx: &Context) -> Result<&mut Overlay> {
        let mut overlay = Overlay::open(path, self.layout.clone(), None, None).await?;
        if self.contains(overlay.name()) {
            exn::bail!(ErrorKind::DuplicateName(overlay.name().to_string()));
        }
        overlay.restore(ctx).await?;
        self.add(overlay)
    }

    /// Unregister `name`, first deleting every definition its files produced.
    /// Nothing on disk is touched.
    #[instrument(skip(self, ctx))]
    pub async fn remove(&mut self, name: &str, ctx: &Context) -> Result<Overlay> {
        let index = self
            .overlays
            .iter()
            .position(|o| o.name() == name)
            .ok_or_raise(|| ErrorKind::NotFound(name.to_string()))?;
        self.overlays[index].expunge_all(ctx).await?;
        tracing::info!("removed overlay");
        Ok(self.overlays.remove(index))
    }

    pub async fn scan(&mut self, name: &str, ctx: &Context) -> Result<ScanReport> {
        Ok(self.get_mut(name)?.scan(ctx).await)
    }

    /// Scan every overlay in registration order. Dormant overlays are skipped.
    pub async fn scan_all(&mut self, ctx: &Context) -> Vec<ScanReport> {
        let mut reports = Vec::with_capacity(self.overlays.len());
        for overlay in &mut self.overlays {
            reports.push(overlay.scan(ctx).await);
        }
        reports
    }

    /// Every overlay directory contributing the extension `name`, in
    /// registration order.
    pub async fn extension_paths(&self, name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for overlay in &self.overlays {
            if overlay.has_extension(name).await {
                paths.push(overlay.extension_path(name));
            }
        }
        paths
    }

    pub async fn activate_all(&self, search: &mut SearchPath) -> Result<usize> {
        let mut added = 0;
        for overlay in &self.overlays {
            added += overlay.activate(search).await?;
        }
        Ok(added)
    }

    /// Fetch `uri` into the install directory and register it. A fetch
    /// failure leaves the registry untouched.
    #[instrument(skip(self, scm, ctx))]
    pub async fn install(
        &mut self,
        uri: &str,
        media_type: &str,
        scm: &dyn Scm,
        ctx: &Context,
    ) -> Result<&mut Overlay> {
        let name = name_from_uri(uri).ok_or_raise(|| ErrorKind::Fetch(format!("no overlay name in {uri}")))?;
        if self.contains(name) {
            exn::bail!(ErrorKind::DuplicateName(name.to_string()));
        }
        tokio::fs::create_dir_all(&self.install_dir).await.or_raise(|| ErrorKind::Io(self.install_dir.clone()))?;
        let checkout = scm.checkout(uri, media_type, &self.install_dir.join(name)).await?;
        let opened =
            Overlay::open(&checkout, self.layout.clone(), Some(media_type.to_string()), Some(uri.to_string())).await;
        let mut overlay = match opened {
            Ok(overlay) => overlay,
            Err(err) => {
                if let Err(cleanup) = scm.delete(&checkout).await {
                    tracing::warn!(error = %*cleanup, "unable to delete unusable checkout");
                }
                return Err(err);
            },
        };
        overlay.restore(ctx).await?;
        self.add(overlay)
    }

    /// Pull the latest revision of a remote overlay, then rescan it.
    #[instrument(skip(self, scm, ctx))]
    pub async fn update(&mut self, name: &str, scm: &dyn Scm, ctx: &Context) -> Result<ScanReport> {
        let overlay = self.get_mut(name)?;
        let (Some(media_type), Some(uri)) = (overlay.media_type(), overlay.uri()) else {
            exn::bail!(ErrorKind::NotRemote(name.to_string()));
        };
        scm.update(overlay.path(), media_type, uri).await?;
        Ok(overlay.scan(ctx).await)
    }

    /// Delete a remote overlay's checkout, then [`remove`](Self::remove) it.
    #[instrument(skip(self, scm, ctx))]
    pub async fn uninstall(&mut self, name: &str, scm: &dyn Scm, ctx: &Context) -> Result<Overlay> {
        let overlay = self.get(name)?;
        if !overlay.is_remote() {
            exn::bail!(ErrorKind::NotRemote(name.to_string()));
        }
        scm.delete(overlay.path()).await?;
        self.remove(name, ctx).await
    }
}
