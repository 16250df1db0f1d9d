use crate::error::{Error, ErrorKind};
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use time::UtcDateTime;

/// Category of the most recent failure to cache a tracked file.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    #[display("syntax")]
    Syntax,
    #[display("missing-symbol")]
    MissingSymbol,
    #[display("runtime")]
    Runtime,
    #[display("validation")]
    Validation,
    #[display("io")]
    Io,
    #[display("store")]
    Store,
}
impl FailureKind {
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "syntax" => Self::Syntax,
            "missing-symbol" => Self::MissingSymbol,
            "runtime" => Self::Runtime,
            "validation" => Self::Validation,
            "io" => Self::Io,
            "store" => Self::Store,
            _ => return None,
        })
    }
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}
impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Durable record of one tracked definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Name of the overlay that owns the file.
    pub overlay: String,
    pub path: PathBuf,
    /// Modification time observed at the last successful cache.
    pub timestamp: UtcDateTime,
    /// Kinds produced by the last successful cache, in declaration order.
    pub kinds: Vec<String>,
    pub failure: Option<Failure>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) path: String,
    pub(crate) overlay: String,
    pub(crate) modified_at: i64,
    pub(crate) kinds: String,
    pub(crate) failure_kind: Option<String>,
    pub(crate) failure_message: Option<String>,
}
impl TryFrom<&FileRecord> for FileRow {
    type Error = Error;
    fn try_from(record: &FileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            path: record.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            overlay: record.overlay.clone(),
            modified_at: i64::try_from(record.timestamp.unix_timestamp_nanos())
                .or_raise(|| ErrorKind::InvalidData("modification time"))?,
            kinds: serde_json::to_string(&record.kinds).or_raise(|| ErrorKind::InvalidData("kinds"))?,
            failure_kind: record.failure.as_ref().map(|f| f.kind.to_string()),
            failure_message: record.failure.as_ref().map(|f| f.message.clone()),
        })
    }
}
impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let failure = match (row.failure_kind, row.failure_message) {
            (Some(kind), Some(message)) => Some(Failure {
                kind: FailureKind::parse(&kind).ok_or_raise(|| ErrorKind::InvalidData("failure kind"))?,
                message,
            }),
            (None, None) => None,
            _ => exn::bail!(ErrorKind::InvalidData("failure")),
        };
        Ok(Self {
            overlay: row.overlay,
            path: PathBuf::from(row.path),
            timestamp: UtcDateTime::from_unix_timestamp_nanos(i128::from(row.modified_at))
                .or_raise(|| ErrorKind::InvalidData("modification time"))?,
            kinds: serde_json::from_str(&row.kinds).or_raise(|| ErrorKind::InvalidData("kinds"))?,
            failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record() -> FileRecord {
        FileRecord {
            overlay: "test1".to_string(),
            path: PathBuf::from("/overlays/test1/objects/banner.def"),
            timestamp: UtcDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap(),
            kinds: vec!["widget".to_string(), "gadget".to_string()],
            failure: Some(Failure::new(FailureKind::Syntax, "syntax error at 1:1: unexpected character ';'")),
        }
    }

    #[test]
    fn test_model_to_row_keeps_nanoseconds() {
        let row = FileRow::try_from(&record()).unwrap();
        assert_eq!(row.modified_at, 1_700_000_000_123_456_789);
        assert_eq!(row.kinds, r#"["widget","gadget"]"#);
        assert_eq!(row.failure_kind.as_deref(), Some("syntax"));
        assert_eq!(FileRecord::try_from(row).unwrap(), record());
    }

    #[test]
    fn test_half_failure_is_invalid() {
        let mut row = FileRow::try_from(&record()).unwrap();
        row.failure_message = None;
        let err = FileRecord::try_from(row).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("failure"));
    }

    #[rstest]
    #[case(FailureKind::Syntax)]
    #[case(FailureKind::MissingSymbol)]
    #[case(FailureKind::Runtime)]
    #[case(FailureKind::Validation)]
    #[case(FailureKind::Io)]
    #[case(FailureKind::Store)]
    fn test_failure_kind_tags(#[case] kind: FailureKind) {
        assert_eq!(FailureKind::parse(&kind.to_string()), Some(kind));
    }
}
