use crate::behavior::Behaviors;
use crate::error::{ErrorKind, Result};
use crate::extension::Extension;
use crate::manifest::Manifest;
use async_trait::async_trait;
use exn::OptionExt;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;
use warden_overlay::OverlayCache;

/// Where extension directories come from.
#[async_trait]
pub trait ExtensionSource: Send + Sync {
    /// Every directory contributing the extension `name`, in discovery order.
    async fn extension_paths(&self, name: &str) -> Vec<PathBuf>;
}
#[async_trait]
impl ExtensionSource for OverlayCache {
    async fn extension_paths(&self, name: &str) -> Vec<PathBuf> {
        OverlayCache::extension_paths(self, name).await
    }
}

/// Live extensions, at most one per name, built on first use.
///
/// Dropping the cache tears down every extension it still holds.
#[derive(Debug)]
pub struct ExtensionCache {
    /// In build order, so every extension comes after its dependencies.
    extensions: Vec<Arc<Extension>>,
    behaviors: Arc<Behaviors>,
    manifest_file: String,
}
impl ExtensionCache {
    /// `manifest_file` is the manifest name looked up in each contributing
    /// directory.
    pub fn new(behaviors: Behaviors, manifest_file: impl Into<String>) -> Self {
        Self { extensions: Vec::new(), behaviors: Arc::new(behaviors), manifest_file: manifest_file.into() }
    }

    pub fn behaviors(&self) -> &Behaviors {
        &self.behaviors
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e.name() == name)
    }

    /// Names of the live extensions, in build order.
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    pub fn list(&self) -> &[Arc<Extension>] {
        &self.extensions
    }

    fn cached(&self, name: &str) -> Option<Arc<Extension>> {
        self.extensions.iter().find(|e| e.name() == name).cloned()
    }

    /// Register a pre-built extension.
    pub fn add(&mut self, extension: Extension) -> Result<Arc<Extension>> {
        if self.contains(extension.name()) {
            exn::bail!(ErrorKind::DuplicateName(extension.name().to_string()));
        }
        let extension = Arc::new(extension);
        self.extensions.push(Arc::clone(&extension));
        Ok(extension)
    }

    /// Tear down and forget `name` along with every live extension that
    /// depends on it, directly or not. Its own dependencies are left alone.
    ///
    /// Returns what was removed in teardown order, dependents first. Every
    /// teardown is attempted; the first failure is returned.
    pub fn remove(&mut self, name: &str) -> Result<Vec<Arc<Extension>>> {
        if !self.contains(name) {
            exn::bail!(ErrorKind::NotFound(name.to_string()));
        }
        let mut removed: Vec<Arc<Extension>> = Vec::new();
        // Build order puts every dependency ahead of its dependents.
        for extension in std::mem::take(&mut self.extensions) {
            let doomed = extension.name() == name
                || extension.dependencies().iter().any(|dep| removed.iter().any(|r| Arc::ptr_eq(r, dep)));
            if doomed {
                removed.push(extension);
            } else {
                self.extensions.push(extension);
            }
        }
        removed.reverse();
        tracing::debug!(extension = name, removed = removed.len(), "removing extension");
        let mut first = None;
        for extension in &removed {
            if let Err(err) = extension.teardown() {
                tracing::warn!(extension = extension.name(), error = %*err, "teardown failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(removed), Err)
    }

    /// The live extension `name`, building it (and any dependency not yet
    /// live) from `source` and the registered behaviours if needed.
    #[instrument(skip(self, source))]
    pub async fn get(&mut self, name: &str, source: &dyn ExtensionSource) -> Result<Arc<Extension>> {
        let mut resolving = Vec::new();
        self.resolve(name.to_string(), source, &mut resolving).await
    }

    fn resolve<'a>(
        &'a mut self,
        name: String,
        source: &'a dyn ExtensionSource,
        resolving: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Arc<Extension>>> {
        Box::pin(async move {
            if let Some(extension) = self.cached(&name) {
                return Ok(extension);
            }
            if resolving.contains(&name) {
                let mut chain = resolving.clone();
                chain.push(name);
                exn::bail!(ErrorKind::DependencyCycle(chain));
            }

            let paths = source.extension_paths(&name).await;
            if paths.is_empty() && !self.behaviors.contains(&name) {
                exn::bail!(ErrorKind::NotFound(name));
            }
            let mut manifest = Manifest::default();
            for path in &paths {
                manifest.merge(Manifest::load(&path.join(&self.manifest_file))?);
            }
            let behavior = self.behaviors.build(&name);
            let mut depends = manifest.depends;
            for dependency in &behavior.depends {
                if !depends.contains(dependency) {
                    depends.push(dependency.clone());
                }
            }

            let mut extension = Extension::new(name.clone(), behavior).with_description(manifest.description);
            for path in paths {
                extension = extension.with_path(path);
            }
            resolving.push(name);
            for dependency in depends {
                let dependency = self.resolve(dependency, source, resolving).await?;
                extension = extension.with_dependency(dependency);
            }
            resolving.pop();

            tracing::debug!(extension = extension.name(), "built extension");
            self.add(extension)
        })
    }

    /// Tear down every live extension, most recently built first. Carries on
    /// past failures and returns the first.
    pub fn teardown_all(&self) -> Result<()> {
        let mut first = None;
        for extension in self.extensions.iter().rev() {
            if let Err(err) = extension.teardown() {
                tracing::warn!(extension = extension.name(), error = %*err, "teardown failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
impl Drop for ExtensionCache {
    fn drop(&mut self) {
        // Errors are already logged.
        let _ = self.teardown_all();
    }
}
