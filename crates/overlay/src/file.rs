//! Tracked definition files and their synchronization state machine.
//!
//! ```text
//! untracked --cache--> cached --(edit)--> stale --sync--> cached
//!                        |                  |
//!                        +----(delete)------+--> missing --sync--> removed
//! ```
//!
//! Staleness is decided by modification time alone. A file rewritten with
//! identical content but a new mtime is re-cached, and an edit that somehow
//! preserves the mtime exactly goes unnoticed.

use crate::Context;
use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::instrument;
use warden_definition::error::Error as DefinitionError;
use warden_store::{Failure, FailureKind, FileRecord};

/// Result of synchronizing one file, as reported to the user.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was (re-)loaded and its definitions written to the store.
    #[display("cached")]
    Cached,
    /// The file has not changed since it was last cached.
    #[display("unchanged")]
    Unchanged,
    /// The file is gone; its record and definitions were deleted.
    #[display("removed")]
    Removed,
    #[display("failed: {_0}")]
    Failed(Failure),
}
impl FileOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

fn load_failure(err: &DefinitionError) -> Failure {
    // Registry errors cannot come out of parsing a file, only out of
    // building the registry, so anything unrecognised is a validation issue.
    let kind = FailureKind::parse(err.tag()).unwrap_or(FailureKind::Validation);
    Failure::new(kind, (**err).to_string())
}

/// Converts any error escaping a file operation into the failure reported for it.
pub(crate) fn failure_of(err: &Error) -> Failure {
    match &**err {
        ErrorKind::Cache { failure, .. } => failure.clone(),
        ErrorKind::Io(_) => Failure::new(FailureKind::Io, (**err).to_string()),
        other => Failure::new(FailureKind::Store, other.to_string()),
    }
}

/// In-memory handle on one tracked definition file.
///
/// The durable counterpart is a [`FileRecord`], which only exists once the
/// file has been cached successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    overlay: String,
    path: PathBuf,
    /// Modification time at the last successful cache. `None` until then.
    timestamp: Option<UtcDateTime>,
    kinds: Vec<String>,
    last_failure: Option<Failure>,
}
impl CachedFile {
    /// An untracked file belonging to `overlay`.
    pub fn new(overlay: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            overlay: overlay.into(),
            path: path.into(),
            timestamp: None,
            kinds: Vec::new(),
            last_failure: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn overlay(&self) -> &str {
        &self.overlay
    }

    pub fn timestamp(&self) -> Option<UtcDateTime> {
        self.timestamp
    }

    /// Kinds produced by the last successful cache, in declaration order.
    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    /// Whether the file has ever been cached successfully.
    pub fn is_cached(&self) -> bool {
        self.timestamp.is_some()
    }

    fn record(&self, timestamp: UtcDateTime) -> FileRecord {
        FileRecord {
            overlay: self.overlay.clone(),
            path: self.path.clone(),
            timestamp,
            kinds: self.kinds.clone(),
            failure: self.last_failure.clone(),
        }
    }

    async fn modified(&self) -> Result<UtcDateTime> {
        let metadata = tokio::fs::metadata(&self.path).await.or_raise(|| ErrorKind::Io(self.path.clone()))?;
        let modified = metadata.modified().or_raise(|| ErrorKind::Io(self.path.clone()))?;
        Ok(UtcDateTime::from(modified))
    }

    /// `true` iff the path no longer exists as a regular file.
    pub async fn is_missing(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => Ok(!metadata.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(ErrorKind::io(err, &self.path)),
        }
    }

    /// `true` iff the on-disk modification time differs from the one recorded
    /// at the last successful cache (in either direction), or there has been
    /// no successful cache yet.
    pub async fn is_stale(&self) -> Result<bool> {
        let modified = self.modified().await?;
        Ok(self.timestamp != Some(modified))
    }

    /// Load the file and replace its definitions in the store.
    ///
    /// On any failure the previous definitions and timestamp are left alone
    /// and the failure is recorded, so a file that stops loading keeps its
    /// last known good definitions.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn cache(&mut self, ctx: &Context) -> Result<()> {
        // Stat before reading: an edit racing with the read must leave the
        // file looking stale.
        let modified = match self.modified().await {
            Ok(modified) => modified,
            Err(err) => return Err(self.fail(ctx, failure_of(&err), err).await),
        };
        let source = match tokio::fs::read_to_string(&self.path).await {
            Ok(source) => source,
            Err(err) => {
                // Text that is not UTF-8 can never be a valid definition file.
                let kind = match err.kind() {
                    std::io::ErrorKind::InvalidData => FailureKind::Syntax,
                    _ => FailureKind::Io,
                };
                let failure = Failure::new(kind, err.to_string());
                let err = ErrorKind::io(err, &self.path);
                return Err(self.fail(ctx, failure, err).await);
            },
        };
        let definitions = match ctx.loader.parse(&source) {
            Ok(definitions) => definitions,
            Err(err) => return Err(self.fail(ctx, load_failure(&err), err).await),
        };
        if let Err(err) = self.replace(ctx, &definitions, modified).await {
            return Err(self.fail(ctx, failure_of(&err), err).await);
        }
        tracing::info!(definitions = definitions.len(), "cached definition file");
        Ok(())
    }

    /// Clean-before-write: every definition the file produced before is
    /// deleted, then the new set is created. The in-memory state only moves
    /// once the record is written, so a store failure leaves the file stale.
    async fn replace(
        &mut self,
        ctx: &Context,
        definitions: &[warden_definition::Definition],
        modified: UtcDateTime,
    ) -> Result<()> {
        let deleted = ctx.store.delete_by_owner(&self.path).await.or_raise(|| ErrorKind::Store)?;
        tracing::trace!(deleted, "deleted previous definitions");
        for definition in definitions {
            ctx.store.create(&self.path, definition).await.or_raise(|| ErrorKind::Store)?;
        }
        let record = FileRecord {
            overlay: self.overlay.clone(),
            path: self.path.clone(),
            timestamp: modified,
            kinds: definitions.iter().map(|d| d.kind.clone()).collect(),
            failure: None,
        };
        ctx.store.upsert_file(&record).await.or_raise(|| ErrorKind::Store)?;
        self.kinds = record.kinds;
        self.last_failure = None;
        self.timestamp = Some(modified);
        Ok(())
    }

    async fn fail<E>(&mut self, ctx: &Context, failure: Failure, err: exn::Exn<E>) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        tracing::warn!(path = %self.path.display(), %failure, "failed to cache definition file");
        self.last_failure = Some(failure.clone());
        if let Some(timestamp) = self.timestamp
            && let Err(store_err) = ctx.store.upsert_file(&self.record(timestamp)).await
        {
            tracing::warn!(error = %*store_err, "unable to record failure");
        }
        err.raise(ErrorKind::Cache { path: self.path.clone(), failure })
    }

    /// Bring the store in line with the file on disk.
    ///
    /// Never fails: any problem is reported as [`FileOutcome::Failed`]. After
    /// [`FileOutcome::Removed`] the file is untracked and should be dropped.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn sync(&mut self, ctx: &Context) -> FileOutcome {
        match self.is_missing().await {
            Ok(true) => {
                return match self.expunge(ctx).await {
                    Ok(()) => FileOutcome::Removed,
                    Err(err) => FileOutcome::Failed(failure_of(&err)),
                };
            },
            Ok(false) => {},
            Err(err) => return FileOutcome::Failed(failure_of(&err)),
        }
        match self.is_stale().await {
            Ok(false) => {
                tracing::trace!("definition file unchanged");
                FileOutcome::Unchanged
            },
            Ok(true) => match self.cache(ctx).await {
                Ok(()) => FileOutcome::Cached,
                Err(err) => FileOutcome::Failed(failure_of(&err)),
            },
            Err(err) => FileOutcome::Failed(failure_of(&err)),
        }
    }

    /// Delete every definition this file produced, then its record.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn expunge(&mut self, ctx: &Context) -> Result<()> {
        let deleted = ctx.store.delete_by_owner(&self.path).await.or_raise(|| ErrorKind::Store)?;
        ctx.store.delete_file(&self.path).await.or_raise(|| ErrorKind::Store)?;
        self.timestamp = None;
        self.kinds.clear();
        self.last_failure = None;
        tracing::info!(deleted, "expunged definition file");
        Ok(())
    }
}
impl From<FileRecord> for CachedFile {
    fn from(record: FileRecord) -> Self {
        Self {
            overlay: record.overlay,
            path: record.path,
            timestamp: Some(record.timestamp),
            kinds: record.kinds,
            last_failure: record.failure,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Context;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use warden_definition::{Kind, KindRegistry, Loader, Value};
    use warden_store::{MemoryStore, Store};

    pub(crate) fn loader() -> Loader {
        Loader::new(
            KindRegistry::default()
                .with(Kind::new("widget").require("content"))
                .with(Kind::new("gadget")),
        )
    }

    pub(crate) fn context() -> (Arc<MemoryStore>, Context) {
        let store = Arc::new(MemoryStore::default());
        let ctx = Context::new(store.clone(), loader());
        (store, ctx)
    }

    /// Write `content` and pin the mtime to `secs` past the epoch, so tests
    /// never depend on filesystem timestamp resolution.
    pub(crate) fn write(path: &Path, content: &str, secs: u64) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    async fn contents(store: &MemoryStore, kind: &str) -> Vec<Value> {
        store
            .list_by_kind(kind)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|d| d.definition.get("content").cloned())
            .collect()
    }

    #[tokio::test]
    async fn test_cache_materializes_definitions() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "widget \"w\" { content = \"v1\" }\ngadget { }", 1_000);

        let mut file = CachedFile::new("test1", &path);
        assert!(file.is_stale().await.unwrap());
        file.cache(&ctx).await.unwrap();

        assert_eq!(file.kinds(), ["widget", "gadget"]);
        assert!(!file.is_stale().await.unwrap());
        assert_eq!(store.find_by_owner(&path).await.unwrap().len(), 2);
        let record = store.get_file(&path).await.unwrap().unwrap();
        assert_eq!(Some(record.timestamp), file.timestamp());
        assert_eq!(record.overlay, "test1");
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_a_syntax_failure() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "", 1_000);
        std::fs::write(&path, b"widget { content = \"\xff\xfe\" }").unwrap();

        let mut file = CachedFile::new("test1", &path);
        let err = file.cache(&ctx).await.unwrap_err();
        let ErrorKind::Cache { failure, .. } = &*err else {
            panic!("expected a cache failure, got {err:?}");
        };
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert_eq!(file.last_failure(), Some(failure));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_sync_never_touches_the_store() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "widget { content = \"v1\" }", 1_000);
        let mut file = CachedFile::new("test1", &path);
        file.cache(&ctx).await.unwrap();

        let mutations = store.mutations();
        for _ in 0..3 {
            assert_eq!(file.sync(&ctx).await, FileOutcome::Unchanged);
        }
        assert_eq!(store.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_dropped_kind_leaves_no_residue() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "widget { content = \"v1\" }\ngadget { }", 1_000);
        let mut file = CachedFile::new("test1", &path);
        file.cache(&ctx).await.unwrap();

        write(&path, "widget { content = \"v2\" }", 2_000);
        assert_eq!(file.sync(&ctx).await, FileOutcome::Cached);

        assert_eq!(contents(&store, "widget").await, [Value::from("v2")]);
        assert!(store.list_by_kind("gadget").await.unwrap().is_empty());
        assert_eq!(file.kinds(), ["widget"]);
    }

    #[tokio::test]
    async fn test_failure_preserves_last_good_state() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "widget { content = \"v1\" }", 1_000);
        let mut file = CachedFile::new("test1", &path);
        file.cache(&ctx).await.unwrap();
        let timestamp = file.timestamp();

        write(&path, "widget { content = ", 2_000);
        let FileOutcome::Failed(failure) = file.sync(&ctx).await else {
            panic!("sync of an unparsable file must fail");
        };
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert_eq!(contents(&store, "widget").await, [Value::from("v1")]);
        assert_eq!(file.timestamp(), timestamp);
        assert_eq!(file.last_failure(), Some(&failure));
        let record = store.get_file(&path).await.unwrap().unwrap();
        assert_eq!(record.failure, Some(failure));
        assert_eq!(Some(record.timestamp), timestamp);
        // Still stale, so the next sync retries.
        assert!(file.is_stale().await.unwrap());

        write(&path, "widget { content = \"v3\" }", 3_000);
        assert_eq!(file.sync(&ctx).await, FileOutcome::Cached);
        assert_eq!(contents(&store, "widget").await, [Value::from("v3")]);
        assert_eq!(file.last_failure(), None);
        assert_eq!(store.get_file(&path).await.unwrap().unwrap().failure, None);
    }

    #[tokio::test]
    async fn test_removal_cascades() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "widget { content = \"v1\" }\ngadget { }", 1_000);
        let mut file = CachedFile::new("test1", &path);
        file.cache(&ctx).await.unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(file.is_missing().await.unwrap());
        assert_eq!(file.sync(&ctx).await, FileOutcome::Removed);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.get_file(&path).await.unwrap(), None);
        assert!(!file.is_cached());
    }

    #[tokio::test]
    async fn test_mtime_moving_backwards_is_stale() {
        let (_store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "gadget { }", 5_000);
        let mut file = CachedFile::new("test1", &path);
        file.cache(&ctx).await.unwrap();
        write(&path, "gadget { }", 4_000);
        assert!(file.is_stale().await.unwrap());
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        // The gadget is fine but the widget lacks `content`.
        write(&path, "gadget { }\nwidget { }", 1_000);
        let mut file = CachedFile::new("test1", &path);
        let err = file.cache(&ctx).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cache { failure, .. } if failure.kind == FailureKind::Validation));
        assert_eq!(store.mutations(), 0);
        assert!(!file.is_cached());
    }

    #[tokio::test]
    async fn test_restored_record_is_not_stale() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.def");
        write(&path, "gadget { }", 1_000);
        CachedFile::new("test1", &path).cache(&ctx).await.unwrap();

        let restored = CachedFile::from(store.get_file(&path).await.unwrap().unwrap());
        assert!(!restored.is_stale().await.unwrap());
        assert_eq!(restored.kinds(), ["gadget"]);
    }
}
