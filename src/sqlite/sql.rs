//! SQL rendering from the structured query state.
//!
//! Filter documents bind their values as `:w<n>_<column>`, SET maps as `:s<n>_<column>`
//! and inserted rows as `:i<n>_<column>`, where `n` is the position of the bind in the
//! statement. Filter values may be operator documents (`{"$gte": 18}`) using the same
//! operators the document driver understands. Raw condition text is spliced in verbatim
//! and binds its own `:name`s from `data`.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::StrawDbError;
use crate::memory::filter::is_operator_doc;
use crate::query::{FieldSpec, OrderSpec, Query, SortDirection};
use crate::types::JsonMap;

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("valid identifier regex");
}

/// Quote a (possibly `schema.`-qualified) identifier after validating it.
///
/// # Errors
/// Returns `StrawDbError::BackendError` for anything that is not a plain identifier.
pub fn quote_ident(name: &str) -> Result<String, StrawDbError> {
    if !IDENTIFIER.is_match(name) {
        return Err(StrawDbError::BackendError(format!(
            "invalid sqlite identifier: {name:?}"
        )));
    }
    Ok(name
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

/// Bind-parameter name for the `index`th bind of a statement; dots become underscores.
fn param_name(prefix: &str, index: usize, column: &str) -> String {
    format!("{prefix}{index}_{}", column.replace('.', "_"))
}

/// A rendered WHERE clause and the values it generated.
#[derive(Debug, Default)]
pub struct Clause {
    pub sql: String,
    pub binds: Vec<(String, JsonValue)>,
}

/// Render `WHERE ...` (with leading space) or an empty clause.
///
/// # Errors
/// Returns `StrawDbError::BackendError` for invalid column names.
pub fn where_clause(query: Option<&Query>) -> Result<Clause, StrawDbError> {
    match query {
        None => Ok(Clause::default()),
        Some(Query::Raw(text)) if text.trim().is_empty() => Ok(Clause::default()),
        Some(Query::Raw(text)) => Ok(Clause {
            sql: format!(" WHERE {}", text.trim()),
            binds: Vec::new(),
        }),
        Some(Query::Filter(map)) if map.is_empty() => Ok(Clause::default()),
        Some(Query::Filter(map)) => {
            let mut parts = Vec::with_capacity(map.len());
            let mut binds = Vec::new();
            for (column, value) in map {
                let quoted = quote_ident(column)?;
                match value {
                    JsonValue::Object(ops) if is_operator_doc(ops) => {
                        for (op, operand) in ops {
                            parts.push(condition(&quoted, column, op, operand, &mut binds)?);
                        }
                    }
                    other => parts.push(condition(&quoted, column, "$eq", other, &mut binds)?),
                }
            }
            Ok(Clause {
                sql: format!(" WHERE {}", parts.join(" AND ")),
                binds,
            })
        }
    }
}

fn bind(column: &str, value: &JsonValue, binds: &mut Vec<(String, JsonValue)>) -> String {
    let name = param_name("w", binds.len(), column);
    binds.push((name.clone(), value.clone()));
    format!(":{name}")
}

/// One comparison of `column` against `operand`. NULL columns never equal a value,
/// so negated forms also accept NULL.
fn condition(
    quoted: &str,
    column: &str,
    op: &str,
    operand: &JsonValue,
    binds: &mut Vec<(String, JsonValue)>,
) -> Result<String, StrawDbError> {
    let compare = |sql_op: &str, binds: &mut Vec<(String, JsonValue)>| {
        format!("{quoted} {sql_op} {}", bind(column, operand, binds))
    };
    let sql = match (op, operand) {
        ("$eq", JsonValue::Null) => format!("{quoted} IS NULL"),
        ("$ne", JsonValue::Null) => format!("{quoted} IS NOT NULL"),
        ("$eq", _) => compare("=", binds),
        ("$ne", _) => format!("({quoted} IS NULL OR {})", compare("<>", binds)),
        ("$gt", _) => compare(">", binds),
        ("$gte", _) => compare(">=", binds),
        ("$lt", _) => compare("<", binds),
        ("$lte", _) => compare("<=", binds),
        ("$in" | "$nin", JsonValue::Array(items)) => {
            let negate = op == "$nin";
            if items.is_empty() {
                return Ok(if negate { "1".to_string() } else { "0".to_string() });
            }
            let list = items
                .iter()
                .map(|item| bind(column, item, binds))
                .collect::<Vec<_>>()
                .join(", ");
            if negate {
                format!("({quoted} IS NULL OR {quoted} NOT IN ({list}))")
            } else {
                format!("{quoted} IN ({list})")
            }
        }
        ("$in" | "$nin", other) => {
            return Err(StrawDbError::BackendError(format!(
                "{op} expects an array, got {other}"
            )));
        }
        ("$exists", flag) => {
            if flag.as_bool().unwrap_or(true) {
                format!("{quoted} IS NOT NULL")
            } else {
                format!("{quoted} IS NULL")
            }
        }
        (other, _) => {
            return Err(StrawDbError::BackendError(format!(
                "unsupported filter operator {other} on column {column}"
            )));
        }
    };
    Ok(sql)
}

/// # Errors
/// Returns `StrawDbError::BackendError` for invalid column names.
pub fn column_list(fields: &FieldSpec) -> Result<String, StrawDbError> {
    match fields {
        FieldSpec::All => Ok("*".to_string()),
        FieldSpec::Columns(columns) => Ok(columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")),
    }
}

/// # Errors
/// Returns `StrawDbError::BackendError` for invalid column names.
pub fn order_by(order: &OrderSpec) -> Result<String, StrawDbError> {
    if order.is_empty() {
        return Ok(String::new());
    }
    let keys = order
        .keys()
        .iter()
        .map(|key| {
            let dir = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            Ok(format!("{} {dir}", quote_ident(&key.column)?))
        })
        .collect::<Result<Vec<String>, StrawDbError>>()?;
    Ok(format!(" ORDER BY {}", keys.join(", ")))
}

/// `LIMIT`/`OFFSET` tail; an offset alone needs `LIMIT -1` in SQLite.
#[must_use]
pub fn limit_offset(offset: Option<u64>, limit: Option<u64>) -> String {
    match (limit, offset) {
        (None, None) => String::new(),
        (Some(l), None) => format!(" LIMIT {l}"),
        (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
        (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
    }
}

/// # Errors
/// Returns `StrawDbError::BackendError` for an empty row or invalid column names.
pub fn insert(table: &str, row: &JsonMap, or_ignore: bool) -> Result<Clause, StrawDbError> {
    if row.is_empty() {
        return Err(StrawDbError::BackendError(
            "cannot insert an empty row".to_string(),
        ));
    }
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    let mut binds = Vec::with_capacity(row.len());
    for (index, (column, value)) in row.iter().enumerate() {
        columns.push(quote_ident(column)?);
        let name = param_name("i", index, column);
        values.push(format!(":{name}"));
        binds.push((name, value.clone()));
    }
    let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
    Ok(Clause {
        sql: format!(
            "{verb} INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            columns.join(", "),
            values.join(", ")
        ),
        binds,
    })
}

/// # Errors
/// Returns `StrawDbError::BackendError` for an empty SET map or invalid column names.
pub fn update(table: &str, set: &JsonMap, criteria: &Query) -> Result<Clause, StrawDbError> {
    if set.is_empty() {
        return Err(StrawDbError::BackendError(
            "update needs at least one column to set".to_string(),
        ));
    }
    let mut assignments = Vec::with_capacity(set.len());
    let mut binds = Vec::with_capacity(set.len());
    for (index, (column, value)) in set.iter().enumerate() {
        let name = param_name("s", index, column);
        assignments.push(format!("{} = :{name}", quote_ident(column)?));
        binds.push((name, value.clone()));
    }
    let filter = where_clause(Some(criteria))?;
    binds.extend(filter.binds);
    Ok(Clause {
        sql: format!(
            "UPDATE {} SET {}{}",
            quote_ident(table)?,
            assignments.join(", "),
            filter.sql
        ),
        binds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_are_validated_and_quoted() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("main.users").unwrap(), "\"main\".\"users\"");
        assert!(quote_ident("users; drop").is_err());
        assert!(quote_ident("").is_err());
    }

    #[test]
    fn filter_where_binds_values_and_nulls() {
        let q = Query::from(json!({"id": 5, "deleted_at": null}));
        let clause = where_clause(Some(&q)).unwrap();
        assert_eq!(clause.sql, " WHERE \"deleted_at\" IS NULL AND \"id\" = :w0_id");
        assert_eq!(clause.binds, vec![("w0_id".to_string(), json!(5))]);
    }

    #[test]
    fn raw_where_is_verbatim() {
        let q = Query::from("age > :min");
        assert_eq!(where_clause(Some(&q)).unwrap().sql, " WHERE age > :min");
        assert!(where_clause(None).unwrap().sql.is_empty());
    }

    #[test]
    fn tails() {
        assert_eq!(limit_offset(None, None), "");
        assert_eq!(limit_offset(Some(5), None), " LIMIT -1 OFFSET 5");
        assert_eq!(limit_offset(Some(5), Some(10)), " LIMIT 10 OFFSET 5");
        assert_eq!(
            order_by(&OrderSpec::from("name desc, id")).unwrap(),
            " ORDER BY \"name\" DESC, \"id\" ASC"
        );
        assert_eq!(column_list(&FieldSpec::from("a, b")).unwrap(), "\"a\", \"b\"");
    }

    #[test]
    fn update_statement() {
        let set = json!({"name": "x"}).as_object().cloned().unwrap();
        let clause = update("users", &set, &Query::from(json!({"id": 1}))).unwrap();
        assert_eq!(
            clause.sql,
            "UPDATE \"users\" SET \"name\" = :s0_name WHERE \"id\" = :w0_id"
        );
        assert_eq!(clause.binds.len(), 2);
    }

    #[test]
    fn operator_documents_render_comparisons() {
        let q = Query::from(json!({
            "age": {"$gte": 18, "$lt": 65},
            "role": {"$in": ["admin", "ops"]},
            "team": {"$ne": "x"},
            "email": {"$exists": true}
        }));
        let clause = where_clause(Some(&q)).unwrap();
        assert_eq!(
            clause.sql,
            " WHERE \"age\" >= :w0_age AND \"age\" < :w1_age \
             AND \"email\" IS NOT NULL \
             AND \"role\" IN (:w2_role, :w3_role) \
             AND (\"team\" IS NULL OR \"team\" <> :w4_team)"
        );
        assert_eq!(clause.binds.len(), 5);

        let empty_in = Query::from(json!({"id": {"$in": []}}));
        assert_eq!(where_clause(Some(&empty_in)).unwrap().sql, " WHERE 0");
        assert!(where_clause(Some(&Query::from(json!({"id": {"$regex": "a"}})))).is_err());
        assert!(where_clause(Some(&Query::from(json!({"id": {"$in": 3}})))).is_err());
    }

    #[test]
    fn colliding_column_names_get_distinct_binds() {
        let q = Query::from(json!({"a.b": 1, "a_b": 2}));
        let clause = where_clause(Some(&q)).unwrap();
        let names: Vec<_> = clause.binds.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["w0_a_b", "w1_a_b"]);
        assert!(clause.sql.contains(":w0_a_b") && clause.sql.contains(":w1_a_b"));
    }
}
