use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{Statement, ToSql};
use serde_json::Value as JsonValue;

use crate::error::StrawDbError;
use crate::types::JsonMap;

/// Convert a single JSON value to a rusqlite `Value`.
///
/// Booleans become 0/1, nested arrays and objects are stored as JSON text.
#[must_use]
pub fn json_to_sqlite_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
    }
}

/// Named `SQLite` parameters for one statement.
///
/// Generated binds (`:w<n>_*`, `:s<n>_*`, `:i<n>_*`) and caller `data` share one namespace;
/// generated names win on collision.
#[derive(Debug, Default)]
pub struct Params(HashMap<String, Value>);

impl Params {
    #[must_use]
    pub fn new(data: &JsonMap, generated: &[(String, JsonValue)]) -> Self {
        let mut map: HashMap<String, Value> = data
            .iter()
            .map(|(k, v)| (k.clone(), json_to_sqlite_value(v)))
            .collect();
        for (k, v) in generated {
            map.insert(k.clone(), json_to_sqlite_value(v));
        }
        Params(map)
    }

    /// Pair every parameter the prepared statement declares with its value.
    ///
    /// Only the names the statement uses are bound, so extra `data` entries are
    /// harmless.
    ///
    /// # Errors
    /// Returns `StrawDbError::BackendError` for positional placeholders or names with no value.
    pub fn bind_for(&self, stmt: &Statement<'_>) -> Result<Vec<(String, Value)>, StrawDbError> {
        let mut bound = Vec::with_capacity(stmt.parameter_count());
        for idx in 1..=stmt.parameter_count() {
            let Some(name) = stmt.parameter_name(idx) else {
                return Err(StrawDbError::BackendError(format!(
                    "positional parameter ?{idx} is not supported, use :name"
                )));
            };
            let key = name.trim_start_matches([':', '@', '$']);
            let value = self.0.get(key).ok_or_else(|| {
                StrawDbError::BackendError(format!("no value bound for parameter {name}"))
            })?;
            bound.push((name.to_string(), value.clone()));
        }
        Ok(bound)
    }
}

/// Borrow owned `(name, value)` pairs in the shape rusqlite accepts as named params.
#[must_use]
pub fn as_named(bound: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    bound
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_sqlite() {
        assert_eq!(json_to_sqlite_value(&json!(null)), Value::Null);
        assert_eq!(json_to_sqlite_value(&json!(true)), Value::Integer(1));
        assert_eq!(json_to_sqlite_value(&json!(7)), Value::Integer(7));
        assert_eq!(json_to_sqlite_value(&json!(1.5)), Value::Real(1.5));
        assert_eq!(json_to_sqlite_value(&json!("a")), Value::Text("a".into()));
        assert_eq!(
            json_to_sqlite_value(&json!({"k": [1]})),
            Value::Text("{\"k\":[1]}".into())
        );
    }

    #[test]
    fn binds_only_declared_names() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let stmt = conn.prepare("SELECT :a + :w_b").unwrap();
        let data = json!({"a": 1, "unused": 2}).as_object().cloned().unwrap();
        let params = Params::new(&data, &[("w_b".to_string(), json!(3))]);
        let bound = params.bind_for(&stmt).unwrap();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0], (":a".to_string(), Value::Integer(1)));
    }

    #[test]
    fn missing_values_and_positional_are_errors() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let params = Params::default();
        let stmt = conn.prepare("SELECT :missing").unwrap();
        assert!(params.bind_for(&stmt).is_err());
        let stmt = conn.prepare("SELECT ?").unwrap();
        assert!(params.bind_for(&stmt).is_err());
    }
}
