//! In-memory store for testing.

use crate::Store;
use crate::error::{ErrorKind, Result};
use crate::models::{FileRecord, Handle, StoredDefinition};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use warden_definition::Definition;

#[derive(Default)]
struct State {
    next_id: i64,
    definitions: BTreeMap<Handle, StoredDefinition>,
    // Insertion ordered, mirroring the row order of the SQLite store.
    files: Vec<FileRecord>,
}

/// In-memory store for testing.
///
/// Everything lives behind a single [`RwLock`], so all trait methods operate
/// on `&self`. Every successful write bumps a counter, which lets tests assert
/// that an operation did not touch the store at all.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use warden_definition::Definition;
/// use warden_store::{MemoryStore, Store};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::default();
/// let handle = store.create(Path::new("a.def"), &Definition::new("widget", None)).await.unwrap();
/// assert_eq!(store.find_by_owner(Path::new("a.def")).await.unwrap(), vec![handle]);
/// assert_eq!(store.mutations(), 1);
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    mutations: AtomicU64,
}
impl MemoryStore {
    /// Number of successful writes performed so far.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, owner: &Path, definition: &Definition) -> Result<Handle> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let handle = Handle(state.next_id);
        state.definitions.insert(
            handle,
            StoredDefinition { handle, owner: owner.to_path_buf(), definition: definition.clone() },
        );
        self.mutated();
        Ok(handle)
    }

    async fn delete(&self, handle: Handle) -> Result<()> {
        let mut state = self.state.write().await;
        if state.definitions.remove(&handle).is_none() {
            exn::bail!(ErrorKind::NotFound(handle));
        }
        self.mutated();
        Ok(())
    }

    async fn find_by_owner(&self, owner: &Path) -> Result<Vec<Handle>> {
        let state = self.state.read().await;
        Ok(state.definitions.values().filter(|d| d.owner == owner).map(|d| d.handle).collect())
    }

    async fn get(&self, handle: Handle) -> Result<Option<StoredDefinition>> {
        Ok(self.state.read().await.definitions.get(&handle).cloned())
    }

    async fn list_by_kind(&self, kind: &str) -> Result<Vec<StoredDefinition>> {
        let state = self.state.read().await;
        Ok(state.definitions.values().filter(|d| d.definition.kind == kind).cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.read().await.definitions.len() as u64)
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.files.iter().position(|f| f.path == record.path) {
            Some(index) => state.files[index] = record.clone(),
            None => state.files.push(record.clone()),
        }
        self.mutated();
        Ok(())
    }

    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        Ok(self.state.read().await.files.iter().find(|f| f.path == path).cloned())
    }

    async fn delete_file(&self, path: &Path) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.files.len();
        state.files.retain(|f| f.path != path);
        let deleted = state.files.len() != before;
        if deleted {
            self.mutated();
        }
        Ok(deleted)
    }

    async fn files_for_overlay(&self, overlay: &str) -> Result<Vec<FileRecord>> {
        let state = self.state.read().await;
        Ok(state.files.iter().filter(|f| f.overlay == overlay).cloned().collect())
    }
}
