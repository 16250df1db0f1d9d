mod definition;
mod file;

pub use self::definition::{Handle, StoredDefinition};
pub(crate) use self::definition::DefinitionRow;
pub use self::file::{Failure, FailureKind, FileRecord};
pub(crate) use self::file::FileRow;
