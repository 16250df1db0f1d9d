use std::path::{Path, PathBuf};

/// Ordered list of directories searched for extension library code.
///
/// Activating an overlay appends its extension `lib` directories;
/// deactivating removes them again. A directory is present at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}
impl SearchPath {
    /// Append `dir`, returning `false` if it was already present.
    pub fn push(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.contains(&dir) {
            return false;
        }
        self.dirs.push(dir);
        true
    }

    /// Remove `dir`, returning `false` if it was not present.
    pub fn remove(&mut self, dir: &Path) -> bool {
        let before = self.dirs.len();
        self.dirs.retain(|d| d != dir);
        self.dirs.len() != before
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.iter().any(|d| d == dir)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// First directory, in search order, containing `relative`.
    pub async fn find(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        for dir in &self.dirs {
            let candidate = dir.join(relative.as_ref());
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }
}
