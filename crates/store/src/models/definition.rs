use crate::error::{Error, ErrorKind};
use derive_more::Display;
use exn::ResultExt;
use std::path::PathBuf;
use warden_definition::Definition;

/// Opaque reference to one materialized definition in a store.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct Handle(pub i64);

/// A definition as it lives in the store: the loaded data plus its identity
/// and the path of the file that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDefinition {
    pub handle: Handle,
    pub owner: PathBuf,
    pub definition: Definition,
}

#[derive(sqlx::FromRow)]
pub(crate) struct DefinitionRow {
    id: i64,
    owner: String,
    kind: String,
    name: Option<String>,
    attributes: String,
}
impl TryFrom<DefinitionRow> for StoredDefinition {
    type Error = Error;
    fn try_from(row: DefinitionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            handle: Handle(row.id),
            owner: PathBuf::from(row.owner),
            definition: Definition {
                kind: row.kind,
                name: row.name,
                attributes: serde_json::from_str(&row.attributes).or_raise(|| ErrorKind::InvalidData("attributes"))?,
            },
        })
    }
}
