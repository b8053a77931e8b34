use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Primary key of a record within a collection.
///
/// Integers sort before text; within each kind the natural order applies.
/// `get_all` returns records in this order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Interpret a JSON value as a key. Only strings and integers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }

    /// Pull the key out of `record` following a dotted `key_path`.
    pub fn extract(record: &Value, key_path: &str) -> StoreResult<Self> {
        let mut cursor = record;
        for segment in key_path.split('.') {
            cursor = cursor.get(segment).ok_or_else(|| StoreError::MissingKey {
                key_path: key_path.to_string(),
            })?;
        }
        Self::from_value(cursor).ok_or_else(|| StoreError::MissingKey {
            key_path: key_path.to_string(),
        })
    }

    /// Borrow the text form, if this is a text key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Int(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}
