use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::file::{CachedFile, FileOutcome, failure_of};
use crate::metadata::Metadata;
use crate::registry::Descriptor;
use crate::search::SearchPath;
use crate::walk::{self, Listing};
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::instrument;
use warden_config::Layout;

/// Outcome for one file in a [`ScanReport`].
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{}: {outcome}", path.display())]
pub struct FileReport {
    /// Path relative to the overlay's definitions directory.
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

/// Per-file results of one [`Overlay::scan`], in processing order: new
/// files, then previously tracked files, then removed files, then anything
/// that could not be listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    overlay: String,
    files: Vec<FileReport>,
}
impl ScanReport {
    fn new(overlay: &str) -> Self {
        Self { overlay: overlay.to_string(), files: Vec::new() }
    }

    pub fn overlay(&self) -> &str {
        &self.overlay
    }

    pub fn files(&self) -> &[FileReport] {
        &self.files
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.path == path.as_ref()).map(|f| &f.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.outcome.is_failure())
    }

    /// `true` when no file failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.overlay)?;
        for file in &self.files {
            write!(f, "\n  {file}")?;
        }
        Ok(())
    }
}

/// A content bundle on disk: definition files plus extension directories.
#[derive(Debug)]
pub struct Overlay {
    name: String,
    path: PathBuf,
    media_type: Option<String>,
    uri: Option<String>,
    metadata: Metadata,
    layout: Layout,
    files: Vec<CachedFile>,
}
impl Overlay {
    /// Open the overlay rooted at `path`. The name is the last component of
    /// the canonicalized path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(
        path: impl AsRef<Path>,
        layout: Layout,
        media_type: Option<String>,
        uri: Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let path = tokio::fs::canonicalize(path).await.or_raise(|| ErrorKind::InvalidOverlay(path.to_path_buf()))?;
        let is_dir = tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            exn::bail!(ErrorKind::InvalidOverlay(path));
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_raise(|| ErrorKind::InvalidOverlay(path.clone()))?
            .to_string();
        let metadata = Metadata::load(&path.join(&layout.metadata_file), &name, uri.as_deref())?;
        Ok(Self { name, path, media_type, uri, metadata, layout, files: Vec::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` for a purely local overlay.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// `None` if the overlay was never fetched remotely.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn is_remote(&self) -> bool {
        self.uri.is_some()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn descriptor(&self) -> Descriptor {
        Descriptor { path: self.path.clone(), media_type: self.media_type.clone(), uri: self.uri.clone() }
    }

    pub fn definitions_dir(&self) -> PathBuf {
        self.path.join(&self.layout.definitions_dir)
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.path.join(&self.layout.extensions_dir)
    }

    /// Tracked files, in the order they were first tracked.
    pub fn files(&self) -> &[CachedFile] {
        &self.files
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<&CachedFile> {
        self.files.iter().find(|f| f.path() == path.as_ref())
    }

    fn relative(&self, path: &Path) -> PathBuf {
        let root = self.definitions_dir();
        match path.strip_prefix(&root) {
            Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Replace the tracked files with the records the store holds for this
    /// overlay, so staleness survives a restart.
    #[instrument(skip_all, fields(overlay = %self.name))]
    pub async fn restore(&mut self, ctx: &Context) -> Result<()> {
        let records = ctx.store.files_for_overlay(&self.name).await.or_raise(|| ErrorKind::Store)?;
        self.files = records.into_iter().map(CachedFile::from).collect();
        tracing::debug!(files = self.files.len(), "restored tracked files");
        Ok(())
    }

    /// Bring the store in line with the definitions directory.
    ///
    /// Never fails as a whole. A file that cannot be cached, or a directory
    /// that cannot be listed, is reported in the [`ScanReport`] and the rest
    /// of the overlay is still scanned.
    #[instrument(skip_all, fields(overlay = %self.name))]
    pub async fn scan(&mut self, ctx: &Context) -> ScanReport {
        let listing = walk::list(&self.definitions_dir(), &self.layout.definition_extension).await;
        self.reconcile(ctx, listing).await
    }

    /// Three-way diff of the tracked files against `listing`.
    async fn reconcile(&mut self, ctx: &Context, listing: Listing) -> ScanReport {
        let listed: HashSet<&Path> = listing.files.iter().map(PathBuf::as_path).collect();
        let (existing, unlisted): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.files).into_iter().partition(|f| listed.contains(f.path()));
        // Unlisted only because their directory could not be read: left alone.
        let (obscured, removed): (Vec<_>, Vec<_>) = unlisted.into_iter().partition(|f| listing.is_obscured(f.path()));
        let tracked: HashSet<PathBuf> = existing.iter().map(|f| f.path().to_path_buf()).collect();
        let mut report = ScanReport::new(&self.name);
        let mut kept = obscured;
        let mut fresh = Vec::new();

        for path in listing.files.iter().filter(|path| !tracked.contains(*path)) {
            let mut file = CachedFile::new(&self.name, path);
            let outcome = match file.cache(ctx).await {
                Ok(()) => {
                    fresh.push(file);
                    FileOutcome::Cached
                },
                // Not tracked, so the next scan sees it as new again.
                Err(err) => FileOutcome::Failed(failure_of(&err)),
            };
            report.files.push(FileReport { path: self.relative(path), outcome });
        }

        for mut file in existing {
            let outcome = file.sync(ctx).await;
            let path = self.relative(file.path());
            if outcome != FileOutcome::Removed {
                kept.push(file);
            }
            report.files.push(FileReport { path, outcome });
        }

        for mut file in removed {
            let path = self.relative(file.path());
            let outcome = match file.expunge(ctx).await {
                Ok(()) => FileOutcome::Removed,
                Err(err) => {
                    kept.push(file);
                    FileOutcome::Failed(failure_of(&err))
                },
            };
            report.files.push(FileReport { path, outcome });
        }

        for (path, err) in &listing.unreadable {
            let outcome = FileOutcome::Failed(failure_of(err));
            report.files.push(FileReport { path: self.relative(path), outcome });
        }

        kept.extend(fresh);
        self.files = kept;
        let failures = report.failures().count();
        tracing::info!(files = report.files.len(), failures, "scanned overlay");
        report
    }

    /// Expunge every file this overlay has ever tracked, including any the
    /// store knows about that were never restored into memory.
    #[instrument(skip_all, fields(overlay = %self.name))]
    pub async fn expunge_all(&mut self, ctx: &Context) -> Result<()> {
        let records = ctx.store.files_for_overlay(&self.name).await.or_raise(|| ErrorKind::Store)?;
        for record in records {
            if self.file(&record.path).is_none() {
                self.files.push(CachedFile::from(record));
            }
        }
        while let Some(mut file) = self.files.pop() {
            if let Err(err) = file.expunge(ctx).await {
                self.files.push(file);
                return Err(err);
            }
        }
        tracing::info!("expunged overlay");
        Ok(())
    }

    /// Names of the extensions this overlay contributes, sorted.
    pub async fn extensions(&self) -> Result<Vec<String>> {
        let dir = self.extensions_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ErrorKind::io(err, &dir)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.or_raise(|| ErrorKind::Io(dir.clone()))? {
            let file_type = entry.file_type().await.or_raise(|| ErrorKind::Io(entry.path()))?;
            if file_type.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Directory the extension `name` would occupy in this overlay, whether
    /// or not it exists.
    pub fn extension_path(&self, name: &str) -> PathBuf {
        self.extensions_dir().join(name)
    }

    pub async fn has_extension(&self, name: &str) -> bool {
        tokio::fs::metadata(self.extension_path(name)).await.map(|m| m.is_dir()).unwrap_or(false)
    }

    async fn lib_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for name in self.extensions().await? {
            let lib = self.extension_path(&name).join(&self.layout.lib_dir);
            if tokio::fs::metadata(&lib).await.map(|m| m.is_dir()).unwrap_or(false) {
                dirs.push(lib);
            }
        }
        Ok(dirs)
    }

    /// Add every extension `lib` directory to `search`, returning how many
    /// were added.
    pub async fn activate(&self, search: &mut SearchPath) -> Result<usize> {
        let added = self.lib_dirs().await?.into_iter().filter(|dir| search.push(dir.clone())).count();
        tracing::debug!(overlay = %self.name, added, "activated overlay");
        Ok(added)
    }

    /// Undo [`activate`](Self::activate).
    pub async fn deactivate(&self, search: &mut SearchPath) -> Result<usize> {
        let removed = self.lib_dirs().await?.iter().filter(|dir| search.remove(dir)).count();
        tracing::debug!(overlay = %self.name, removed, "deactivated overlay");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::tests::{context, write};
    use warden_definition::Value;
    use warden_store::{FailureKind, Store};

    async fn open(root: &Path) -> Overlay {
        Overlay::open(root, Layout::default(), None, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "").unwrap();
        let err = Overlay::open(&file, Layout::default(), None, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidOverlay(_)));
        let err = Overlay::open(dir.path().join("absent"), Layout::default(), None, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidOverlay(_)));
    }

    #[tokio::test]
    async fn test_edit_replaces_definition() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        let file = root.join("objects/widget.def");
        write(&file, "widget \"w\" { content = \"v1\" }", 1_000);

        let mut overlay = open(&root).await;
        let report = overlay.scan(&ctx).await;
        assert_eq!(report.get("widget.def"), Some(&FileOutcome::Cached));
        assert_eq!(overlay.files().len(), 1);

        write(&file, "widget \"w\" { content = \"v2\" }", 2_000);
        let report = overlay.scan(&ctx).await;
        assert_eq!(report.get("widget.def"), Some(&FileOutcome::Cached));
        assert_eq!(overlay.files().len(), 1);

        let widgets = store.list_by_kind("widget").await.unwrap();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].definition.get("content"), Some(&Value::from("v2")));
        assert_eq!(widgets[0].owner, overlay.files()[0].path());
    }

    #[tokio::test]
    async fn test_broken_file_is_isolated() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test2");
        write(&root.join("objects/good.def"), "widget { content = \"ok\" }", 1_000);
        write(&root.join("objects/broken.def"), "widget { content = ; }", 1_000);

        let mut overlay = open(&root).await;
        let report = overlay.scan(&ctx).await;
        assert_eq!(report.get("good.def"), Some(&FileOutcome::Cached));
        let Some(FileOutcome::Failed(failure)) = report.get("broken.def") else {
            panic!("broken.def must fail");
        };
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert!(report.to_string().contains("broken.def: failed: syntax"));
        assert_eq!(report.failures().count(), 1);

        let good = overlay.definitions_dir().join("good.def");
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.find_by_owner(&good).await.unwrap().len(), 1);
        // The broken file was never tracked, so it is retried as new.
        assert_eq!(overlay.files().len(), 1);
        assert_eq!(store.get_file(&overlay.definitions_dir().join("broken.def")).await.unwrap(), None);

        write(&root.join("objects/broken.def"), "widget { content = \"fixed\" }", 2_000);
        let report = overlay.scan(&ctx).await;
        assert!(report.is_clean());
        assert_eq!(report.get("broken.def"), Some(&FileOutcome::Cached));
        assert_eq!(report.get("good.def"), Some(&FileOutcome::Unchanged));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_deeply_nested_file_is_isolated() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test2");
        write(&root.join("objects/good.def"), "widget { content = \"ok\" }", 1_000);
        write(&root.join("objects/deep.def"), &format!("widget {{ content = {}", "[".repeat(20_000)), 1_000);

        let mut overlay = open(&root).await;
        let report = overlay.scan(&ctx).await;
        assert_eq!(report.get("good.def"), Some(&FileOutcome::Cached));
        let Some(FileOutcome::Failed(failure)) = report.get("deep.def") else {
            panic!("deep.def must fail");
        };
        assert_eq!(failure.kind, FailureKind::Syntax);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_directory_keeps_its_files() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/a.def"), "gadget { }", 1_000);
        write(&root.join("objects/locked/b.def"), "gadget { }", 1_000);
        let mut overlay = open(&root).await;
        assert!(overlay.scan(&ctx).await.is_clean());
        write(&root.join("objects/c.def"), "gadget { }", 1_000);

        let locked = overlay.definitions_dir().join("locked");
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let listing = Listing {
            files: vec![overlay.definitions_dir().join("a.def"), overlay.definitions_dir().join("c.def")],
            unreadable: vec![(locked.clone(), ErrorKind::io(denied, &locked))],
        };
        let report = overlay.reconcile(&ctx, listing).await;
        let order: Vec<String> = report.files().iter().map(|f| f.path.display().to_string()).collect();
        assert_eq!(order, ["c.def", "a.def", "locked"]);
        let Some(FileOutcome::Failed(failure)) = report.get("locked") else {
            panic!("the locked directory must be reported");
        };
        assert_eq!(failure.kind, FailureKind::Io);
        assert_eq!(report.get("locked/b.def"), None);
        assert_eq!(overlay.files().len(), 3);
        assert_eq!(store.find_by_owner(&locked.join("b.def")).await.unwrap().len(), 1);
        assert!(store.get_file(&locked.join("b.def")).await.unwrap().is_some());

        // Once readable again, nothing has been lost.
        let report = overlay.scan(&ctx).await;
        assert!(report.is_clean());
        assert_eq!(report.get("locked/b.def"), Some(&FileOutcome::Unchanged));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_continues_past_permission_denied() {
        use std::os::unix::fs::PermissionsExt;

        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/a.def"), "gadget { }", 1_000);
        write(&root.join("objects/locked/b.def"), "gadget { }", 1_000);
        let mut overlay = open(&root).await;
        overlay.scan(&ctx).await;

        let locked = overlay.definitions_dir().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        let enforced = std::fs::read_dir(&locked).is_err();
        let report = overlay.scan(&ctx).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(report.get("a.def"), Some(&FileOutcome::Unchanged));
        if enforced {
            assert!(matches!(report.get("locked"), Some(FileOutcome::Failed(_))));
        }
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(overlay.files().len(), 2);
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/a.def"), "gadget { }", 1_000);
        write(&root.join("objects/nested/b.def"), "gadget { }\ngadget { }", 1_000);

        let mut overlay = open(&root).await;
        overlay.scan(&ctx).await;
        let mutations = store.mutations();
        let report = overlay.scan(&ctx).await;
        assert_eq!(store.mutations(), mutations);
        assert!(report.files().iter().all(|f| f.outcome == FileOutcome::Unchanged));
        assert_eq!(report.get("nested/b.def"), Some(&FileOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_scan_orders_new_existing_removed() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/kept.def"), "gadget { }", 1_000);
        write(&root.join("objects/gone.def"), "gadget { }", 1_000);
        let mut overlay = open(&root).await;
        overlay.scan(&ctx).await;

        std::fs::remove_file(root.join("objects/gone.def")).unwrap();
        write(&root.join("objects/added.def"), "gadget { }", 1_000);
        let report = overlay.scan(&ctx).await;
        let order: Vec<String> = report.files().iter().map(ToString::to_string).collect();
        assert_eq!(order, ["added.def: cached", "kept.def: unchanged", "gone.def: removed"]);
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.get_file(&overlay.definitions_dir().join("gone.def")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_survives_restart() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/a.def"), "gadget { }", 1_000);
        open(&root).await.scan(&ctx).await;

        let mut overlay = open(&root).await;
        overlay.restore(&ctx).await.unwrap();
        assert_eq!(overlay.files().len(), 1);
        let mutations = store.mutations();
        let report = overlay.scan(&ctx).await;
        assert_eq!(report.get("a.def"), Some(&FileOutcome::Unchanged));
        assert_eq!(store.mutations(), mutations);
    }

    #[tokio::test]
    async fn test_expunge_all_includes_unrestored_files() {
        let (store, ctx) = context();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        write(&root.join("objects/a.def"), "gadget { }", 1_000);
        write(&root.join("objects/b.def"), "widget { content = 1 }", 1_000);
        open(&root).await.scan(&ctx).await;
        assert_eq!(store.count().await.unwrap(), 2);

        let mut overlay = open(&root).await;
        overlay.expunge_all(&ctx).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.files_for_overlay("test1").await.unwrap().is_empty());
        assert!(overlay.files().is_empty());
    }

    #[tokio::test]
    async fn test_extensions_and_activation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        std::fs::create_dir_all(root.join("extensions/shellcode/lib")).unwrap();
        std::fs::create_dir_all(root.join("extensions/common/lib")).unwrap();
        std::fs::create_dir_all(root.join("extensions/bare")).unwrap();
        std::fs::write(root.join("extensions/README"), "").unwrap();

        let overlay = open(&root).await;
        assert_eq!(overlay.extensions().await.unwrap(), ["bare", "common", "shellcode"]);
        assert!(overlay.has_extension("common").await);
        assert!(!overlay.has_extension("README").await);

        let mut search = SearchPath::default();
        assert_eq!(overlay.activate(&mut search).await.unwrap(), 2);
        assert_eq!(overlay.activate(&mut search).await.unwrap(), 0);
        assert!(search.contains(&overlay.extension_path("common").join("lib")));
        assert_eq!(overlay.deactivate(&mut search).await.unwrap(), 2);
        assert!(search.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_defaults_to_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("test1");
        std::fs::create_dir_all(&root).unwrap();
        let overlay = Overlay::open(&root, Layout::default(), Some("git".into()), Some("https://example.com/test1.git".into()))
            .await
            .unwrap();
        assert_eq!(overlay.name(), "test1");
        assert_eq!(overlay.metadata().title, "test1");
        assert_eq!(overlay.metadata().source.as_deref(), Some("https://example.com/test1.git"));
        assert!(overlay.is_remote());
    }
}
