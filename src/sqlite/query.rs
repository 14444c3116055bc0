use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use super::params::as_named;
use crate::error::StrawDbError;
use crate::types::{Document, NativeValue};

pub type SharedConnection = Arc<Mutex<rusqlite::Connection>>;

/// Convert a `SQLite` value into a native value.
#[must_use]
pub fn sqlite_to_native(value: Value) -> NativeValue {
    match value {
        Value::Null => NativeValue::Null,
        Value::Integer(i) => NativeValue::Int(i),
        Value::Real(f) => NativeValue::Float(f),
        Value::Text(s) => NativeValue::Text(s),
        Value::Blob(b) => NativeValue::Blob(b),
    }
}

/// Run a prepared SELECT and collect each row into a document keyed by column name.
///
/// # Errors
/// Returns `StrawDbError::SqliteError` if execution or value extraction fails.
pub fn collect_documents(
    stmt: &mut Statement<'_>,
    bound: &[(String, Value)],
) -> Result<Vec<Document>, StrawDbError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();

    let named = as_named(bound);
    let mut rows = stmt.query(named.as_slice())?;
    let mut docs = Vec::new();
    while let Some(row) = rows.next()? {
        let mut doc = Document::new();
        for (idx, name) in column_names.iter().enumerate() {
            let value: Value = row.get(idx)?;
            doc.insert(name.clone(), sqlite_to_native(value));
        }
        docs.push(doc);
    }
    Ok(docs)
}

/// Execute a prepared DML statement and return the affected row count.
///
/// # Errors
/// Returns `StrawDbError::SqliteError` if execution fails.
pub fn execute(stmt: &mut Statement<'_>, bound: &[(String, Value)]) -> Result<u64, StrawDbError> {
    let named = as_named(bound);
    let affected = stmt.execute(named.as_slice())?;
    Ok(affected as u64)
}

/// Run synchronous `rusqlite` work on the blocking pool.
pub(crate) async fn run_blocking<F, R>(conn: SharedConnection, func: F) -> Result<R, StrawDbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, StrawDbError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| StrawDbError::BackendError(format!("sqlite spawn_blocking join error: {e}")))?
}
