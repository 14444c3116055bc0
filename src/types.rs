use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::StrawDbError;

/// A record as returned by a driver, before normalization.
pub type Document = BTreeMap<String, NativeValue>;

/// Plain mapping used for conditions, bind data, options and write payloads.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Values as a backend hands them back.
///
/// Drivers speak in this type so the model can normalize backend-specific leaves
/// (object ids, timestamps) into plain JSON in one place:
/// ```rust
/// use straw_model::prelude::*;
///
/// let id = ObjectId::new();
/// let value = NativeValue::ObjectId(id);
/// assert_eq!(normalize(&value), serde_json::json!(id.to_hex()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// NULL / missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed integer value (64-bit)
    Int(i64),
    /// Unsigned integer too large for `Int`
    UInt(u64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// Document-store object identifier
    ObjectId(ObjectId),
    /// Backend timestamp, always stored in UTC
    Timestamp(DateTime<Utc>),
    /// Ordered list of values
    Array(Vec<NativeValue>),
    /// Nested document
    Document(Document),
}

impl NativeValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            NativeValue::Int(value) => Some(*value),
            NativeValue::UInt(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        if let NativeValue::Document(doc) = self {
            Some(doc)
        } else {
            None
        }
    }
}

impl From<JsonValue> for NativeValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => NativeValue::Null,
            JsonValue::Bool(b) => NativeValue::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    NativeValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    NativeValue::UInt(u)
                } else {
                    NativeValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => NativeValue::Text(s),
            JsonValue::Array(items) => {
                NativeValue::Array(items.into_iter().map(NativeValue::from).collect())
            }
            JsonValue::Object(map) => NativeValue::Document(
                map.into_iter()
                    .map(|(k, v)| (k, NativeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// 12-byte document identifier: 4 bytes of unix seconds, 5 random bytes, 3 counter bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    #[must_use]
    pub fn new() -> Self {
        let secs = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX);
        let random: [u8; 5] = rand::random();
        let count = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        ObjectId(bytes)
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse the 24-character hex form.
    ///
    /// # Errors
    /// Returns `StrawDbError::BackendError` when the text is not 24 hex digits.
    pub fn parse_str(s: &str) -> Result<Self, StrawDbError> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(StrawDbError::BackendError(format!("invalid object id: {s}")));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| StrawDbError::BackendError(format!("invalid object id: {s}")))?;
        }
        Ok(ObjectId(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

/// The backend kinds a configuration entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// `SQLite` through rusqlite
    #[serde(alias = "Sqlite")]
    Sqlite,
    /// `MySQL`; no built-in driver, register one on the `DriverRegistry`
    #[serde(alias = "Mysql")]
    Mysql,
    /// `MongoDB`; no built-in driver, register one on the `DriverRegistry`
    #[serde(alias = "Mongodb")]
    Mongodb,
    /// In-process document store
    #[serde(alias = "Memory")]
    Memory,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::Sqlite => "sqlite",
            DriverKind::Mysql => "mysql",
            DriverKind::Mongodb => "mongodb",
            DriverKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Which side of a read/write split a terminal call needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_hex_round_trips() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(ObjectId::parse_str(&hex).unwrap(), id);
    }

    #[test]
    fn object_id_rejects_bad_text() {
        assert!(ObjectId::parse_str("xyz").is_err());
        assert!(ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn object_ids_are_distinct() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn json_numbers_keep_their_shape() {
        assert_eq!(NativeValue::from(serde_json::json!(5)), NativeValue::Int(5));
        assert_eq!(
            NativeValue::from(serde_json::json!(u64::MAX)),
            NativeValue::UInt(u64::MAX)
        );
        assert_eq!(NativeValue::from(serde_json::json!(1.5)), NativeValue::Float(1.5));
    }
}
