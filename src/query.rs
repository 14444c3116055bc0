//! Structured query state shared by the model and the drivers.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::JsonMap;

/// A query condition.
///
/// `Raw` is handed to the driver verbatim (a SQL `WHERE` fragment or a full statement
/// for raw queries); `Filter` is a structured equality document every driver understands.
/// ```rust
/// use straw_model::prelude::*;
/// use serde_json::json;
///
/// let raw = Query::from("age > :min");
/// let filter = Query::from(json!({"id": 1}));
/// assert!(matches!(raw, Query::Raw(_)));
/// assert!(matches!(filter, Query::Filter(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    Raw(String),
    Filter(JsonMap),
}

impl Query {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Query::Raw(text) => text.trim().is_empty(),
            Query::Filter(map) => map.is_empty(),
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::Filter(JsonMap::new())
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query::Raw(value.to_string())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query::Raw(value)
    }
}

impl From<JsonMap> for Query {
    fn from(value: JsonMap) -> Self {
        Query::Filter(value)
    }
}

impl From<JsonValue> for Query {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Query::Filter(map),
            JsonValue::String(text) => Query::Raw(text),
            JsonValue::Null => Query::default(),
            other => Query::Raw(other.to_string()),
        }
    }
}

/// Which fields a read should return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSpec {
    #[default]
    All,
    Columns(Vec<String>),
}

impl FieldSpec {
    #[must_use]
    pub fn is_all(&self) -> bool {
        match self {
            FieldSpec::All => true,
            FieldSpec::Columns(cols) => cols.is_empty(),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            FieldSpec::All => &[],
            FieldSpec::Columns(cols) => cols,
        }
    }

    fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cols: Vec<String> = names
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if cols.is_empty() || cols.iter().any(|c| c == "*") {
            FieldSpec::All
        } else {
            FieldSpec::Columns(cols)
        }
    }
}

impl From<&str> for FieldSpec {
    fn from(value: &str) -> Self {
        FieldSpec::from_names(value.split(','))
    }
}

impl From<String> for FieldSpec {
    fn from(value: String) -> Self {
        FieldSpec::from(value.as_str())
    }
}

impl From<Vec<String>> for FieldSpec {
    fn from(value: Vec<String>) -> Self {
        FieldSpec::from_names(value)
    }
}

impl From<Vec<&str>> for FieldSpec {
    fn from(value: Vec<&str>) -> Self {
        FieldSpec::from_names(value)
    }
}

impl<const N: usize> From<[&str; N]> for FieldSpec {
    fn from(value: [&str; N]) -> Self {
        FieldSpec::from_names(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Ordering of a multi-row read; empty means backend order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec(pub Vec<SortKey>);

impl OrderSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }
}

/// Parses `"name desc, id"`; an unknown direction word falls back to ascending.
impl From<&str> for OrderSpec {
    fn from(value: &str) -> Self {
        let keys = value
            .split(',')
            .filter_map(|part| {
                let mut words = part.split_whitespace();
                let column = words.next()?.to_string();
                let direction = match words.next() {
                    Some(word) if word.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                    _ => SortDirection::Asc,
                };
                Some(SortKey { column, direction })
            })
            .collect();
        OrderSpec(keys)
    }
}

impl From<String> for OrderSpec {
    fn from(value: String) -> Self {
        OrderSpec::from(value.as_str())
    }
}

impl From<Vec<(&str, SortDirection)>> for OrderSpec {
    fn from(value: Vec<(&str, SortDirection)>) -> Self {
        OrderSpec(
            value
                .into_iter()
                .filter(|(column, _)| !column.trim().is_empty())
                .map(|(column, direction)| SortKey {
                    column: column.trim().to_string(),
                    direction,
                })
                .collect(),
        )
    }
}

/// Document-store style `{"age": -1, "name": 1}`.
impl From<JsonMap> for OrderSpec {
    fn from(value: JsonMap) -> Self {
        OrderSpec(
            value
                .into_iter()
                .map(|(column, dir)| SortKey {
                    column,
                    direction: if dir.as_i64() == Some(-1)
                        || dir.as_str().is_some_and(|s| s.eq_ignore_ascii_case("desc"))
                    {
                        SortDirection::Desc
                    } else {
                        SortDirection::Asc
                    },
                })
                .collect(),
        )
    }
}
