//! Conversion of backend-native values into plain JSON.

use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Number, Value as JsonValue};

use crate::types::{Document, NativeValue};

/// Format used for rendered timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a backend timestamp in the process's local timezone.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Convert a native value into its plain, backend-agnostic form.
///
/// Object ids become their hex string, timestamps become local `YYYY-MM-DD HH:MM:SS`
/// strings, containers are walked recursively and scalars pass through.
#[must_use]
pub fn normalize(value: &NativeValue) -> JsonValue {
    match value {
        NativeValue::Null => JsonValue::Null,
        NativeValue::Bool(b) => JsonValue::Bool(*b),
        NativeValue::Int(i) => JsonValue::Number(Number::from(*i)),
        NativeValue::UInt(u) => JsonValue::Number(Number::from(*u)),
        // NaN and infinities have no JSON form
        NativeValue::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        NativeValue::Text(s) => JsonValue::String(s.clone()),
        NativeValue::Blob(bytes) => JsonValue::Array(
            bytes
                .iter()
                .map(|b| JsonValue::Number(Number::from(*b)))
                .collect(),
        ),
        NativeValue::ObjectId(id) => JsonValue::String(id.to_hex()),
        NativeValue::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
        NativeValue::Array(items) => JsonValue::Array(items.iter().map(normalize).collect()),
        NativeValue::Document(doc) => normalize_document(doc),
    }
}

/// Normalize a whole record into a JSON object.
#[must_use]
pub fn normalize_document(doc: &Document) -> JsonValue {
    let mut out = Map::with_capacity(doc.len());
    for (key, value) in doc {
        out.insert(key.clone(), normalize(value));
    }
    JsonValue::Object(out)
}

/// Normalize a list of records.
#[must_use]
pub fn normalize_documents(docs: &[Document]) -> Vec<JsonValue> {
    docs.iter().map(normalize_document).collect()
}
