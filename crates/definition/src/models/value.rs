use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An evaluated attribute value.
///
/// Nested blocks evaluate to [`Value::Map`]; everything else comes straight
/// from a literal, a list, a constant, or a concatenation of those.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(untagged))]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}
impl Value {
    /// Human-readable name of the value's type, used in evaluation errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "block",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(values: Vec<V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            },
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {key} = {value}")?;
                }
                write!(f, " }}")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let value = Value::List(vec![Value::from("a"), Value::Integer(2), Value::Bool(false)]);
        assert_eq!(value.to_string(), r#"["a", 2, false]"#);
        let map = Value::Map(BTreeMap::from([("retries".to_string(), Value::Integer(3))]));
        assert_eq!(map.to_string(), "{ retries = 3 }");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_shape() {
        let value = Value::Map(BTreeMap::from([
            ("content".to_string(), Value::from("v1")),
            ("ratio".to_string(), Value::Float(0.5)),
            ("ports".to_string(), Value::from(vec![80_i64, 443])),
        ]));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"content":"v1","ports":[80,443],"ratio":0.5}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), value);
    }
}
