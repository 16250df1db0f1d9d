//! Discovery of definition files beneath a directory.

use crate::error::{Error, ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::pin::pin;
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(PathBuf),
    Descend(PathBuf),
    Skip,
}

async fn process_entry(entry: DirEntry, extension: &OsStr) -> Result<WalkEntry> {
    let path = entry.path();
    let file_type = entry.file_type().await.or_raise(|| ErrorKind::Io(path.clone()))?;
    if file_type.is_dir() {
        return Ok(WalkEntry::Descend(path));
    }
    if file_type.is_file() && path.extension() == Some(extension) {
        return Ok(WalkEntry::File(path));
    }
    // Other extensions, and symlinks which are not followed.
    Ok(WalkEntry::Skip)
}

/// Stream every regular file under `root` (recursively) whose extension is
/// `extension`, in no particular order.
///
/// A `root` that does not exist yields nothing. Errors reading individual
/// directories or entries are yielded without ending the stream.
pub(crate) fn definition_files<'a>(root: &'a Path, extension: &'a str) -> impl Stream<Item = Result<PathBuf>> + 'a {
    let mut stack = vec![root.to_path_buf()];
    let extension = OsStr::new(extension);
    stream! {
        'dirs: while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    yield Err(ErrorKind::io(err, &current));
                    continue 'dirs;
                },
            };
            'entries: loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break 'entries,
                    Err(err) => {
                        yield Err(ErrorKind::io(err, &current));
                        continue 'dirs;
                    },
                };
                match process_entry(entry, extension).await {
                    Ok(WalkEntry::File(path)) => yield Ok(path),
                    Ok(WalkEntry::Descend(dir)) => stack.push(dir),
                    Ok(WalkEntry::Skip) => {},
                    Err(e) => yield Err(e),
                }
            }
        }
    }
}

/// Everything a walk of a definitions directory found.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    /// Sorted.
    pub(crate) files: Vec<PathBuf>,
    /// Directories (or single entries) that could not be read. Files beneath
    /// them may still exist.
    pub(crate) unreadable: Vec<(PathBuf, Error)>,
}
impl Listing {
    /// Whether `path` lies beneath something that could not be read, so its
    /// absence from [`files`](Self::files) says nothing.
    pub(crate) fn is_obscured(&self, path: &Path) -> bool {
        self.unreadable.iter().any(|(dir, _)| path.starts_with(dir))
    }
}

/// Collect [`definition_files`], keeping going past unreadable entries.
pub(crate) async fn list(root: &Path, extension: &str) -> Listing {
    let mut listing = Listing::default();
    let mut files = pin!(definition_files(root, extension));
    while let Some(item) = files.next().await {
        match item {
            Ok(path) => listing.files.push(path),
            Err(err) => {
                let path = match &*err {
                    ErrorKind::Io(path) => path.clone(),
                    _ => root.to_path_buf(),
                };
                tracing::warn!(path = %path.display(), error = %*err, "unable to list definitions");
                listing.unreadable.push((path, err));
            },
        }
    }
    listing.files.sort();
    listing
}
