//! Decentralized overlay registry for security research content.
//!
//! [`Warden`] is the composition point: it owns the configuration, the
//! durable store, the [`OverlayCache`] and the [`ExtensionCache`], and exposes
//! the operations an embedding binary needs. Everything below it is
//! constructed explicitly; the only process-wide instance is the optional one
//! behind [`Warden::global`].

pub mod error;

pub use warden_config as config;
pub use warden_definition as definition;
pub use warden_extension as extension;
pub use warden_overlay as overlay;
pub use warden_store as store;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::instrument;
use warden_config::Config;
use warden_definition::{KindRegistry, Loader};
use warden_extension::{Behaviors, Extension, ExtensionCache};
use warden_overlay::{Context, OverlayCache, ScanReport, Scm, SearchPath};
use warden_store::{Database, Repository, StoreHandle};

static GLOBAL: OnceCell<Warden> = OnceCell::const_new();

pub struct Warden {
    config: Config,
    ctx: Context,
    database: Option<Database>,
    overlays: Mutex<OverlayCache>,
    extensions: Mutex<ExtensionCache>,
    search: Mutex<SearchPath>,
}
impl Warden {
    /// Open the SQLite store and overlay registry described by `config`.
    #[instrument(skip_all, fields(data_dir = %config.paths.data_dir.display()))]
    pub async fn open(config: Config, kinds: KindRegistry, behaviors: Behaviors) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let data_dir = &config.paths.data_dir;
        tokio::fs::create_dir_all(data_dir).await.or_raise(|| ErrorKind::Io(data_dir.clone()))?;
        let database = Database::connect(config.paths.database()).await.or_raise(|| ErrorKind::Store)?;
        let store: StoreHandle = Arc::new(Repository::from(&database));
        let mut warden = Self::with_store(config, store, kinds, behaviors).await?;
        warden.database = Some(database);
        Ok(warden)
    }

    /// Like [`open`](Self::open), but over an existing store.
    pub async fn with_store(
        config: Config,
        store: StoreHandle,
        kinds: KindRegistry,
        behaviors: Behaviors,
    ) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let ctx = Context::new(store, Loader::new(kinds));
        let overlays = OverlayCache::load(
            config.paths.overlays_file(),
            config.paths.overlays_dir(),
            config.layout.clone(),
            &ctx,
        )
        .await
        .or_raise(|| ErrorKind::Overlay)?;
        let mut search = SearchPath::default();
        overlays.activate_all(&mut search).await.or_raise(|| ErrorKind::Overlay)?;
        let extensions = ExtensionCache::new(behaviors, config.layout.manifest_file.clone());
        tracing::info!(store = ctx.store.name(), overlays = overlays.len(), "warden opened");
        Ok(Self {
            config,
            ctx,
            database: None,
            overlays: Mutex::new(overlays),
            extensions: Mutex::new(extensions),
            search: Mutex::new(search),
        })
    }

    /// Open the process-wide instance. Fails if one already exists.
    pub async fn init_global(config: Config, kinds: KindRegistry, behaviors: Behaviors) -> Result<&'static Self> {
        if GLOBAL.initialized() {
            exn::bail!(ErrorKind::AlreadyInitialized);
        }
        let warden = Self::open(config, kinds, behaviors).await?;
        if GLOBAL.set(warden).is_err() {
            exn::bail!(ErrorKind::AlreadyInitialized);
        }
        GLOBAL.get().ok_or_raise(|| ErrorKind::AlreadyInitialized)
    }

    /// The process-wide instance, if [`init_global`](Self::init_global) has run.
    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub async fn overlays(&self) -> MutexGuard<'_, OverlayCache> {
        self.overlays.lock().await
    }

    pub async fn extensions(&self) -> MutexGuard<'_, ExtensionCache> {
        self.extensions.lock().await
    }

    /// Current module search path, with every registered overlay activated.
    pub async fn search_path(&self) -> SearchPath {
        self.search.lock().await.clone()
    }

    /// Scan every registered overlay. Failures are reported per file.
    pub async fn scan_all(&self) -> Vec<ScanReport> {
        self.overlays.lock().await.scan_all(&self.ctx).await
    }

    /// Register the local overlay at `path`, returning its name.
    pub async fn add_overlay(&self, path: impl AsRef<Path>) -> Result<String> {
        let mut overlays = self.overlays.lock().await;
        let overlay = overlays.add_path(path, &self.ctx).await.or_raise(|| ErrorKind::Overlay)?;
        overlay.activate(&mut *self.search.lock().await).await.or_raise(|| ErrorKind::Overlay)?;
        let name = overlay.name().to_string();
        overlays.save().or_raise(|| ErrorKind::Overlay)?;
        Ok(name)
    }

    /// Unregister `name`, deleting its definitions and forgetting any live
    /// extension it contributed to. A dormant overlay is simply forgotten.
    pub async fn remove_overlay(&self, name: &str) -> Result<()> {
        let mut overlays = self.overlays.lock().await;
        if overlays.is_dormant(name) {
            overlays.forget(name, &self.ctx).await.or_raise(|| ErrorKind::Overlay)?;
            return overlays.save().or_raise(|| ErrorKind::Overlay);
        }
        self.retire(&overlays, name).await?;
        if let Err(err) = overlays.remove(name, &self.ctx).await {
            self.reactivate(&overlays, name).await;
            return Err(err).or_raise(|| ErrorKind::Overlay);
        }
        overlays.save().or_raise(|| ErrorKind::Overlay)
    }

    /// Deactivate `name` and drop the live extensions it contributes.
    async fn retire(&self, overlays: &OverlayCache, name: &str) -> Result<()> {
        let overlay = overlays.get(name).or_raise(|| ErrorKind::Overlay)?;
        overlay.deactivate(&mut *self.search.lock().await).await.or_raise(|| ErrorKind::Overlay)?;
        let mut extensions = self.extensions.lock().await;
        for contributed in overlay.extensions().await.or_raise(|| ErrorKind::Overlay)? {
            if extensions.contains(&contributed) {
                extensions.remove(&contributed).or_raise(|| ErrorKind::Extension)?;
            }
        }
        Ok(())
    }

    /// Undo the deactivation half of [`retire`](Self::retire) after a failed removal.
    async fn reactivate(&self, overlays: &OverlayCache, name: &str) {
        let Ok(overlay) = overlays.get(name) else {
            return;
        };
        if let Err(err) = overlay.activate(&mut *self.search.lock().await).await {
            tracing::warn!(overlay = name, error = %*err, "unable to reactivate overlay");
        }
    }

    /// Fetch and register a remote overlay, returning its name.
    pub async fn install(&self, uri: &str, media_type: &str, scm: &dyn Scm) -> Result<String> {
        let mut overlays = self.overlays.lock().await;
        let overlay = overlays.install(uri, media_type, scm, &self.ctx).await.or_raise(|| ErrorKind::Overlay)?;
        overlay.activate(&mut *self.search.lock().await).await.or_raise(|| ErrorKind::Overlay)?;
        let name = overlay.name().to_string();
        overlays.save().or_raise(|| ErrorKind::Overlay)?;
        Ok(name)
    }

    pub async fn update(&self, name: &str, scm: &dyn Scm) -> Result<ScanReport> {
        let mut overlays = self.overlays.lock().await;
        let report = overlays.update(name, scm, &self.ctx).await.or_raise(|| ErrorKind::Overlay)?;
        let overlay = overlays.get(name).or_raise(|| ErrorKind::Overlay)?;
        // An update may have brought in new extensions.
        overlay.activate(&mut *self.search.lock().await).await.or_raise(|| ErrorKind::Overlay)?;
        Ok(report)
    }

    pub async fn uninstall(&self, name: &str, scm: &dyn Scm) -> Result<()> {
        let mut overlays = self.overlays.lock().await;
        self.retire(&overlays, name).await?;
        if let Err(err) = overlays.uninstall(name, scm, &self.ctx).await {
            self.reactivate(&overlays, name).await;
            return Err(err).or_raise(|| ErrorKind::Overlay);
        }
        overlays.save().or_raise(|| ErrorKind::Overlay)
    }

    /// The live extension `name`, built from the registered overlays if needed.
    pub async fn extension(&self, name: &str) -> Result<Arc<Extension>> {
        let overlays = self.overlays.lock().await;
        let mut extensions = self.extensions.lock().await;
        extensions.get(name, &*overlays).await.or_raise(|| ErrorKind::Extension)
    }

    /// Set up `name` and its dependencies, run `block`, then tear them down.
    pub async fn run_extension<T, F>(&self, name: &str, block: F) -> Result<T>
    where
        F: FnOnce(&Extension) -> warden_extension::error::Result<T>,
    {
        let extension = self.extension(name).await?;
        extension.run(block).or_raise(|| ErrorKind::Extension)
    }

    /// Tear down every live extension, save the overlay registry, and close
    /// the store. Everything is attempted; the first failure is returned.
    #[instrument(skip_all)]
    pub async fn shutdown(&self) -> Result<()> {
        let teardown = self.extensions.lock().await.teardown_all().or_raise(|| ErrorKind::Extension);
        let save = self.overlays.lock().await.save().or_raise(|| ErrorKind::Overlay);
        if let Some(database) = &self.database {
            database.close().await;
        }
        tracing::info!("warden shut down");
        teardown.and(save)
    }
}
