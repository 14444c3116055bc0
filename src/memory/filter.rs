//! Filter evaluation, extended-JSON literals and ordering for the document driver.

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use crate::error::StrawDbError;
use crate::query::{OrderSpec, Query, SortDirection};
use crate::types::{Document, JsonMap, NativeValue, ObjectId};

/// Convert a JSON literal into a native value, honouring `{"$oid": ..}` and `{"$date": ..}`.
///
/// # Errors
/// Returns `StrawDbError::BackendError` for malformed id or date literals.
pub fn from_extended_json(value: &JsonValue) -> Result<NativeValue, StrawDbError> {
    match value {
        JsonValue::Object(map) if map.len() == 1 => {
            if let Some(oid) = map.get("$oid") {
                let text = oid.as_str().ok_or_else(|| {
                    StrawDbError::BackendError(format!("$oid must be a string, got {oid}"))
                })?;
                return Ok(NativeValue::ObjectId(ObjectId::parse_str(text)?));
            }
            if let Some(date) = map.get("$date") {
                return parse_date(date).map(NativeValue::Timestamp);
            }
            object_to_document(map).map(NativeValue::Document)
        }
        JsonValue::Object(map) => object_to_document(map).map(NativeValue::Document),
        JsonValue::Array(items) => items
            .iter()
            .map(from_extended_json)
            .collect::<Result<Vec<_>, _>>()
            .map(NativeValue::Array),
        other => Ok(NativeValue::from(other.clone())),
    }
}

/// Convert a JSON object into a document, field by field.
///
/// # Errors
/// As `from_extended_json`.
pub fn object_to_document(map: &JsonMap) -> Result<Document, StrawDbError> {
    map.iter()
        .map(|(k, v)| -> Result<(String, NativeValue), StrawDbError> {
            Ok((k.clone(), from_extended_json(v)?))
        })
        .collect()
}

fn parse_date(value: &JsonValue) -> Result<DateTime<Utc>, StrawDbError> {
    let parsed = match value {
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    };
    parsed.ok_or_else(|| StrawDbError::BackendError(format!("invalid $date literal: {value}")))
}

/// Resolve the driver-native form of a condition into a JSON filter.
///
/// Raw text must itself be a JSON object. String values of the form `:name` are bound
/// from `data`.
///
/// # Errors
/// Returns `StrawDbError::BackendError` if raw text is not a JSON object.
pub fn resolve_filter(query: Option<&Query>, data: &JsonMap) -> Result<JsonMap, StrawDbError> {
    let filter = match query {
        None => JsonMap::new(),
        Some(Query::Filter(map)) => map.clone(),
        Some(Query::Raw(text)) if text.trim().is_empty() => JsonMap::new(),
        Some(Query::Raw(text)) => match serde_json::from_str::<JsonValue>(text) {
            Ok(JsonValue::Object(map)) => map,
            _ => {
                return Err(StrawDbError::BackendError(format!(
                    "document driver expects a JSON object filter, got: {text}"
                )));
            }
        },
    };
    Ok(bind_map(filter, data))
}

fn bind_map(map: JsonMap, data: &JsonMap) -> JsonMap {
    map.into_iter().map(|(k, v)| (k, bind(v, data))).collect()
}

fn bind(value: JsonValue, data: &JsonMap) -> JsonValue {
    match value {
        JsonValue::String(s) => match s.strip_prefix(':').and_then(|name| data.get(name)) {
            Some(bound) => bound.clone(),
            None => JsonValue::String(s),
        },
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(|v| bind(v, data)).collect())
        }
        JsonValue::Object(map) => JsonValue::Object(bind_map(map, data)),
        other => other,
    }
}

/// Look up a possibly dotted path (`profile.city`).
#[must_use]
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a NativeValue> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// An object whose keys are all query operators (`{"$gt": 1}`), as opposed to a literal.
#[must_use]
pub fn is_operator_doc(map: &JsonMap) -> bool {
    !map.is_empty()
        && map.keys().all(|k| k.starts_with('$'))
        && !map.contains_key("$oid")
        && !map.contains_key("$date")
}

/// Whether `doc` satisfies every condition of `filter`.
///
/// # Errors
/// Returns `StrawDbError::BackendError` for malformed literals or unknown operators.
pub fn matches(doc: &Document, filter: &JsonMap) -> Result<bool, StrawDbError> {
    for (path, condition) in filter {
        let actual = lookup(doc, path).unwrap_or(&NativeValue::Null);
        let ok = match condition {
            JsonValue::Object(ops) if is_operator_doc(ops) => {
                let mut all = true;
                for (op, operand) in ops {
                    if !apply_operator(actual, op, operand)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            literal => values_equal(actual, &from_extended_json(literal)?),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_operator(actual: &NativeValue, op: &str, operand: &JsonValue) -> Result<bool, StrawDbError> {
    let expected = || from_extended_json(operand);
    Ok(match op {
        "$eq" => values_equal(actual, &expected()?),
        "$ne" => !values_equal(actual, &expected()?),
        "$gt" => !actual.is_null() && compare(actual, &expected()?) == Ordering::Greater,
        "$gte" => !actual.is_null() && compare(actual, &expected()?) != Ordering::Less,
        "$lt" => !actual.is_null() && compare(actual, &expected()?) == Ordering::Less,
        "$lte" => !actual.is_null() && compare(actual, &expected()?) != Ordering::Greater,
        "$in" | "$nin" => {
            let JsonValue::Array(items) = operand else {
                return Err(StrawDbError::BackendError(format!(
                    "{op} expects an array, got {operand}"
                )));
            };
            let mut found = false;
            for item in items {
                if values_equal(actual, &from_extended_json(item)?) {
                    found = true;
                    break;
                }
            }
            if op == "$in" { found } else { !found }
        }
        "$exists" => operand.as_bool().unwrap_or(true) != actual.is_null(),
        other => {
            return Err(StrawDbError::BackendError(format!(
                "unsupported filter operator {other}"
            )));
        }
    })
}

#[must_use]
pub fn as_number(value: &NativeValue) -> Option<f64> {
    match value {
        NativeValue::Int(i) => Some(*i as f64),
        NativeValue::UInt(u) => Some(*u as f64),
        NativeValue::Float(f) => Some(*f),
        _ => None,
    }
}

/// Equality that lets an object id match its hex string and `1` match `1.0`.
#[must_use]
pub fn values_equal(a: &NativeValue, b: &NativeValue) -> bool {
    match (a, b) {
        (NativeValue::ObjectId(id), NativeValue::Text(s))
        | (NativeValue::Text(s), NativeValue::ObjectId(id)) => id.to_hex() == *s,
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn type_rank(value: &NativeValue) -> u8 {
    match value {
        NativeValue::Null => 0,
        NativeValue::Int(_) | NativeValue::UInt(_) | NativeValue::Float(_) => 1,
        NativeValue::Text(_) => 2,
        NativeValue::Document(_) => 3,
        NativeValue::Array(_) => 4,
        NativeValue::Blob(_) => 5,
        NativeValue::ObjectId(_) => 6,
        NativeValue::Bool(_) => 7,
        NativeValue::Timestamp(_) => 8,
    }
}

/// Total order used for sorting and range operators (nulls first).
#[must_use]
pub fn compare(a: &NativeValue, b: &NativeValue) -> Ordering {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (NativeValue::Text(x), NativeValue::Text(y)) => x.cmp(y),
        (NativeValue::ObjectId(x), NativeValue::ObjectId(y)) => x.cmp(y),
        (NativeValue::Bool(x), NativeValue::Bool(y)) => x.cmp(y),
        (NativeValue::Timestamp(x), NativeValue::Timestamp(y)) => x.cmp(y),
        (NativeValue::Blob(x), NativeValue::Blob(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Sort documents in place by `order`; a stable sort keeps insertion order for ties.
pub fn sort_documents(docs: &mut [Document], order: &OrderSpec) {
    if order.is_empty() {
        return;
    }
    docs.sort_by(|x, y| {
        for key in order.keys() {
            let a = lookup(x, &key.column).unwrap_or(&NativeValue::Null);
            let b = lookup(y, &key.column).unwrap_or(&NativeValue::Null);
            let ord = match key.direction {
                SortDirection::Asc => compare(a, b),
                SortDirection::Desc => compare(b, a),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
