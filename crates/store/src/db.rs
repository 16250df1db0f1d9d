//! SQLite pool for the definition store.

use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connection-level settings with no builder method on [`SqliteConnectOptions`].
const CONNECTION_PRAGMAS: &[&str] = &["PRAGMA temp_store = MEMORY", "PRAGMA cache_size = -2048"];

/// Where the store lives.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    File(&'a Path),
    Memory,
}
impl Target<'_> {
    fn options(self) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new()
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Re-caching a file deletes and recreates its definitions one
            // statement at a time while readers may be listing kinds.
            .busy_timeout(Duration::from_millis(1500));
        match self {
            Self::File(path) => options.filename(path).create_if_missing(true).journal_mode(SqliteJournalMode::Wal),
            Self::Memory => options.filename(":memory:"),
        }
    }

    /// Every connection to `:memory:` opens its own empty database.
    fn max_connections(self) -> u32 {
        match self {
            Self::File(_) => 4,
            Self::Memory => 1,
        }
    }
}

/// Pooled connection to the definition store, migrated on open.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the store database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Target::File(path.as_ref())).await
    }

    /// A private in-memory store, available outside `#[cfg(test)]` so that
    /// dependent crates can use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::open(Target::Memory).await
    }

    async fn open(target: Target<'_>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(target.max_connections())
            .after_connect(|conn, _| {
                Box::pin(async move {
                    for pragma in CONNECTION_PRAGMAS.iter().copied() {
                        sqlx::query(pragma).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_with(target.options())
            .await
            .or_raise(|| ErrorKind::Database)?;
        MIGRATOR.run(&pool).await.or_raise(|| ErrorKind::Migration)?;
        tracing::debug!(?target, "store database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool once every checked-out connection is returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_migrated() {
        let db = Database::connect_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 0);
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_reopening_a_file_keeps_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        let db = Database::connect(&path).await.unwrap();
        sqlx::query("INSERT INTO definitions (kind, name, attributes, owner) VALUES ('widget', NULL, '{}', 'a.def')")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let db = Database::connect(&path).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM definitions").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 1);
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(db.pool()).await.unwrap();
        assert_eq!(mode.0, "wal");
        db.close().await;
    }
}
