//! SQLite-backed [`Store`] implementation.

use crate::Database;
use crate::Store;
use crate::error::{ErrorKind, Result};
use crate::models::{DefinitionRow, FileRecord, FileRow, Handle, StoredDefinition};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::instrument;
use warden_definition::Definition;

/// Repository for definitions and tracked file records.
///
/// Definitions reference their owning file by path only. There is no
/// cascading delete between the two tables; the caller decides when
/// definitions go away.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<&str> {
        path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))
    }
}

#[async_trait]
impl Store for Repository {
    fn name(&self) -> &str {
        "sqlite"
    }

    #[instrument(skip_all, fields(owner = %owner.display(), kind = %definition.kind))]
    async fn create(&self, owner: &Path, definition: &Definition) -> Result<Handle> {
        let attributes =
            serde_json::to_string(&definition.attributes).or_raise(|| ErrorKind::InvalidData("attributes"))?;
        let (id,): (i64,) = sqlx::query_as(include_str!("../queries/insert_definition.sql"))
            .bind(Self::sqlx_hates_paths(owner)?)
            .bind(&definition.kind)
            .bind(definition.name.as_deref())
            .bind(attributes)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Handle(id))
    }

    async fn delete(&self, handle: Handle) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/delete_definition.sql"))
            .bind(handle.0)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(handle));
        }
        Ok(())
    }

    async fn find_by_owner(&self, owner: &Path) -> Result<Vec<Handle>> {
        let ids: Vec<(i64,)> = sqlx::query_as(include_str!("../queries/find_by_owner.sql"))
            .bind(Self::sqlx_hates_paths(owner)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(ids.into_iter().map(|(id,)| Handle(id)).collect())
    }

    async fn get(&self, handle: Handle) -> Result<Option<StoredDefinition>> {
        let row: Option<DefinitionRow> = sqlx::query_as(include_str!("../queries/get_definition.sql"))
            .bind(handle.0)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(StoredDefinition::try_from).transpose()
    }

    async fn list_by_owner(&self, owner: &Path) -> Result<Vec<StoredDefinition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(include_str!("../queries/list_by_owner.sql"))
            .bind(Self::sqlx_hates_paths(owner)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(StoredDefinition::try_from).collect()
    }

    async fn list_by_kind(&self, kind: &str) -> Result<Vec<StoredDefinition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(include_str!("../queries/list_by_kind.sql"))
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(StoredDefinition::try_from).collect()
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_definitions.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("count"))
    }

    #[instrument(skip_all, fields(path = %record.path.display()))]
    async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        let row = FileRow::try_from(record)?;
        sqlx::query(include_str!("../queries/upsert_file.sql"))
            .bind(row.path)
            .bind(row.overlay)
            .bind(row.modified_at)
            .bind(row.kinds)
            .bind(row.failure_kind)
            .bind(row.failure_message)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
            .bind(Self::sqlx_hates_paths(path)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    async fn delete_file(&self, path: &Path) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_file.sql"))
            .bind(Self::sqlx_hates_paths(path)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn files_for_overlay(&self, overlay: &str) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/files_for_overlay.sql"))
            .bind(overlay)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Failure, FailureKind};
    use std::path::PathBuf;
    use time::UtcDateTime;
    use warden_definition::Value;

    async fn repository() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    fn widget(content: &str) -> Definition {
        Definition::new("widget", Some("banner".to_string())).with_attribute("content", content)
    }

    fn record(path: &str, overlay: &str) -> FileRecord {
        FileRecord {
            overlay: overlay.to_string(),
            path: PathBuf::from(path),
            timestamp: UtcDateTime::from_unix_timestamp_nanos(1_700_000_000_000_000_001).unwrap(),
            kinds: vec!["widget".to_string()],
            failure: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repository().await;
        let owner = Path::new("/o/test1/objects/a.def");
        let handle = repo.create(owner, &widget("v1")).await.unwrap();

        let stored = repo.get(handle).await.unwrap().unwrap();
        assert_eq!(stored.owner, owner);
        assert_eq!(stored.definition, widget("v1"));
        assert_eq!(repo.find_by_owner(owner).await.unwrap(), vec![handle]);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_handle() {
        let repo = repository().await;
        let err = repo.delete(Handle(42)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(Handle(42)));
    }

    #[tokio::test]
    async fn test_delete_by_owner_leaves_other_owners() {
        let repo = repository().await;
        let a = Path::new("/o/a.def");
        let b = Path::new("/o/b.def");
        repo.create(a, &widget("1")).await.unwrap();
        repo.create(a, &Definition::new("gadget", None)).await.unwrap();
        let kept = repo.create(b, &widget("2")).await.unwrap();

        assert_eq!(repo.delete_by_owner(a).await.unwrap(), 2);
        assert!(repo.list_by_owner(a).await.unwrap().is_empty());
        let remaining = repo.list_by_kind("widget").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].handle, kept);
        assert_eq!(remaining[0].definition.get("content"), Some(&Value::from("2")));
    }

    #[tokio::test]
    async fn test_upsert_file_replaces_in_place() {
        let repo = repository().await;
        repo.upsert_file(&record("/o/test1/objects/a.def", "test1")).await.unwrap();
        repo.upsert_file(&record("/o/test1/objects/b.def", "test1")).await.unwrap();
        repo.upsert_file(&record("/o/test2/objects/c.def", "test2")).await.unwrap();

        let mut updated = record("/o/test1/objects/a.def", "test1");
        updated.kinds.clear();
        updated.failure = Some(Failure::new(FailureKind::Runtime, "boom"));
        repo.upsert_file(&updated).await.unwrap();

        let files = repo.files_for_overlay("test1").await.unwrap();
        // Replacing a record keeps its original position.
        assert_eq!(files, vec![updated.clone(), record("/o/test1/objects/b.def", "test1")]);
        assert_eq!(repo.get_file(&updated.path).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let repo = repository().await;
        let path = Path::new("/o/test1/objects/a.def");
        repo.upsert_file(&record("/o/test1/objects/a.def", "test1")).await.unwrap();
        assert!(repo.delete_file(path).await.unwrap());
        assert!(!repo.delete_file(path).await.unwrap());
        assert_eq!(repo.get_file(path).await.unwrap(), None);
    }
}
