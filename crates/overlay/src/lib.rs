//! Overlays, the definition files they contain, and the registry of overlays.
//!
//! An overlay is a directory with a fixed layout (see [`warden_config::Layout`]):
//!
//! ```text
//! <overlay>/
//!   overlay.toml          optional metadata
//!   objects/**/*.def      definition files, tracked as [`CachedFile`]s
//!   extensions/<name>/    one directory per contributed extension
//!     lib/                added to the [`SearchPath`] on activation
//! ```
//!
//! Scanning an overlay synchronizes the durable store with its definition
//! files one file at a time. Failures are isolated per file and reported in a
//! [`ScanReport`]; only registry-level problems surface as errors.

pub mod error;
mod file;
mod metadata;
mod overlay;
mod registry;
mod scm;
mod search;
mod walk;

pub use crate::file::{CachedFile, FileOutcome};
pub use crate::metadata::{Maintainer, Metadata};
pub use crate::overlay::{FileReport, Overlay, ScanReport};
pub use crate::registry::{Descriptor, OverlayCache};
pub use crate::scm::{GitScm, Scm};
pub use crate::search::SearchPath;
use warden_definition::Loader;
use warden_store::StoreHandle;

/// Collaborators needed to synchronize definition files.
#[derive(Clone)]
pub struct Context {
    pub store: StoreHandle,
    pub loader: Loader,
}
impl Context {
    pub fn new(store: StoreHandle, loader: Loader) -> Self {
        Self { store, loader }
    }
}
impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("store", &self.store.name()).field("loader", &self.loader).finish()
    }
}
