//! Durable store for materialized definitions.
//!
//! The store is not the source of truth, the definition files are. It holds
//! two things:
//! - **Definitions**: one row per block loaded from a definition file, keyed
//!   by an opaque [`Handle`] and carrying a back-reference to the file that
//!   produced it. Deleting a file record does *not* delete its definitions;
//!   callers delete those explicitly first.
//! - **File records**: one row per tracked file, holding the modification
//!   time of the last successful cache, the kinds it produced, and the most
//!   recent failure (if any).

mod db;
pub mod error;
#[cfg(feature = "mock")]
mod memory;
mod models;
mod repo;

pub use crate::db::Database;
use crate::error::Result;
#[cfg(feature = "mock")]
pub use crate::memory::MemoryStore;
pub use crate::models::{Failure, FailureKind, FileRecord, Handle, StoredDefinition};
pub use crate::repo::Repository;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use warden_definition::Definition;

pub type StoreHandle = Arc<dyn Store + Send + Sync>;

/// Interface to the durable store consumed by tracked files.
///
/// Every operation is individually atomic; there are no multi-operation
/// transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the store implementation, for logging only.
    fn name(&self) -> &str;

    /// Materialize a definition owned by the file at `owner`.
    async fn create(&self, owner: &Path, definition: &Definition) -> Result<Handle>;

    /// Delete a single definition.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the handle
    /// does not exist.
    async fn delete(&self, handle: Handle) -> Result<()>;

    /// Handles of every definition owned by the file at `owner`, oldest first.
    async fn find_by_owner(&self, owner: &Path) -> Result<Vec<Handle>>;

    async fn get(&self, handle: Handle) -> Result<Option<StoredDefinition>>;

    /// Every definition owned by the file at `owner`, oldest first.
    ///
    /// Default implementation looks up each handle from
    /// [`find_by_owner()`](Self::find_by_owner) in turn.
    async fn list_by_owner(&self, owner: &Path) -> Result<Vec<StoredDefinition>> {
        let mut definitions = Vec::new();
        for handle in self.find_by_owner(owner).await? {
            if let Some(definition) = self.get(handle).await? {
                definitions.push(definition);
            }
        }
        Ok(definitions)
    }

    async fn list_by_kind(&self, kind: &str) -> Result<Vec<StoredDefinition>>;

    /// Total number of definitions in the store.
    async fn count(&self) -> Result<u64>;

    /// Delete every definition owned by the file at `owner`, returning how
    /// many were deleted.
    async fn delete_by_owner(&self, owner: &Path) -> Result<usize> {
        let handles = self.find_by_owner(owner).await?;
        for handle in &handles {
            self.delete(*handle).await?;
        }
        Ok(handles.len())
    }

    /// Insert or replace the record for `record.path`.
    async fn upsert_file(&self, record: &FileRecord) -> Result<()>;

    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>>;

    /// Delete the record for `path`, returning whether one existed.
    async fn delete_file(&self, path: &Path) -> Result<bool>;

    /// Every file record belonging to `overlay`, in the order they were first
    /// recorded.
    async fn files_for_overlay(&self, overlay: &str) -> Result<Vec<FileRecord>>;
}
