//! Relational driver on `rusqlite`.
//!
//! The profile's host names a directory holding `<database>.sqlite3`; the special host
//! `:memory:` opens a private in-memory database that lives as long as the driver.

pub mod params;
pub mod query;
pub mod sql;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::ConnectionProfile;
use crate::driver::{Driver, InsertData, InsertResult, SelectRequest, UpdateResult};
use crate::error::StrawDbError;
use crate::query::{FieldSpec, Query};
use crate::types::{Document, DriverKind, JsonMap, NativeValue};
use params::Params;
use query::{SharedConnection, collect_documents, execute, run_blocking};

pub const MEMORY_HOST: &str = ":memory:";

pub struct SqliteDriver {
    conn: SharedConnection,
    table: Option<String>,
    last_query: Option<String>,
}

impl SqliteDriver {
    /// Open the database file for `profile`.
    ///
    /// # Errors
    /// Returns `StrawDbError::SqliteError` if the file cannot be opened or configured.
    pub fn connect(profile: &ConnectionProfile) -> Result<Self, StrawDbError> {
        let conn = if profile.host == MEMORY_HOST {
            rusqlite::Connection::open_in_memory()?
        } else {
            let database = if profile.database.is_empty() {
                "default"
            } else {
                profile.database.as_str()
            };
            let path = Path::new(&profile.host).join(format!("{database}.sqlite3"));
            debug!(path = %path.display(), "opening sqlite database");
            let conn = rusqlite::Connection::open(path)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already open connection.
    #[must_use]
    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            table: None,
            last_query: None,
        }
    }

    fn table(&self) -> Result<String, StrawDbError> {
        self.table
            .clone()
            .ok_or_else(|| StrawDbError::BackendError("no table selected".to_string()))
    }

    async fn select_docs(
        &mut self,
        sql: String,
        params: Params,
    ) -> Result<Vec<Document>, StrawDbError> {
        self.last_query = Some(sql.clone());
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let bound = params.bind_for(&stmt)?;
            collect_documents(&mut stmt, &bound)
        })
        .await
    }

    async fn execute_dml(&mut self, sql: String, params: Params) -> Result<u64, StrawDbError> {
        self.last_query = Some(sql.clone());
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let bound = params.bind_for(&stmt)?;
            execute(&mut stmt, &bound)
        })
        .await
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn select_table(&mut self, table: &str) -> Result<(), StrawDbError> {
        sql::quote_ident(table)?;
        self.table = Some(table.to_string());
        Ok(())
    }

    /// Inserts every row in one transaction. `{"ignore": true}` skips conflicting rows.
    async fn insert(
        &mut self,
        data: &InsertData,
        options: &JsonMap,
    ) -> Result<InsertResult, StrawDbError> {
        let table = self.table()?;
        let or_ignore = options
            .get("ignore")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let statements = data
            .rows()
            .iter()
            .map(|row| sql::insert(&table, row, or_ignore))
            .collect::<Result<Vec<_>, _>>()?;
        self.last_query = statements.last().map(|clause| clause.sql.clone());

        run_blocking(Arc::clone(&self.conn), move |conn| {
            let tx = conn.transaction()?;
            let mut result = InsertResult::default();
            for clause in statements {
                let params = Params::new(&JsonMap::new(), &clause.binds);
                let affected = {
                    let mut stmt = tx.prepare(&clause.sql)?;
                    let bound = params.bind_for(&stmt)?;
                    execute(&mut stmt, &bound)?
                };
                if affected > 0 {
                    result
                        .inserted_ids
                        .push(NativeValue::Int(tx.last_insert_rowid()));
                }
                result.affected += affected;
            }
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn get_one(
        &mut self,
        query: &Query,
        fields: &FieldSpec,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<Option<Document>, StrawDbError> {
        let table = self.table()?;
        let filter = sql::where_clause(Some(query))?;
        let text = format!(
            "SELECT {} FROM {}{} LIMIT 1",
            sql::column_list(fields)?,
            sql::quote_ident(&table)?,
            filter.sql
        );
        let params = Params::new(data, &filter.binds);
        Ok(self.select_docs(text, params).await?.into_iter().next())
    }

    async fn get_all(&mut self, request: SelectRequest<'_>) -> Result<Vec<Document>, StrawDbError> {
        let table = self.table()?;
        let filter = sql::where_clause(request.query)?;
        let text = format!(
            "SELECT {} FROM {}{}{}{}",
            sql::column_list(request.fields)?,
            sql::quote_ident(&table)?,
            filter.sql,
            sql::order_by(request.order)?,
            sql::limit_offset(request.offset, request.limit)
        );
        let params = Params::new(request.data, &filter.binds);
        self.select_docs(text, params).await
    }

    async fn count(
        &mut self,
        query: Option<&Query>,
        count_field: &str,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        let table = self.table()?;
        let target = if count_field == "*" {
            "*".to_string()
        } else {
            sql::quote_ident(count_field)?
        };
        let filter = sql::where_clause(query)?;
        let text = format!(
            "SELECT COUNT({target}) AS n FROM {}{}",
            sql::quote_ident(&table)?,
            filter.sql
        );
        let params = Params::new(data, &filter.binds);
        let docs = self.select_docs(text, params).await?;
        let n = docs
            .first()
            .and_then(|doc| doc.get("n"))
            .and_then(NativeValue::as_int)
            .unwrap_or(0);
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn update(
        &mut self,
        set: &JsonMap,
        criteria: &Query,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<UpdateResult, StrawDbError> {
        let table = self.table()?;
        let clause = sql::update(&table, set, criteria)?;
        let params = Params::new(data, &clause.binds);
        let affected = self.execute_dml(clause.sql, params).await?;
        Ok(UpdateResult {
            matched: affected,
            modified: affected,
            upserted_id: None,
        })
    }

    async fn delete(
        &mut self,
        criteria: &Query,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        let table = self.table()?;
        let filter = sql::where_clause(Some(criteria))?;
        let text = format!("DELETE FROM {}{}", sql::quote_ident(&table)?, filter.sql);
        let params = Params::new(data, &filter.binds);
        self.execute_dml(text, params).await
    }

    /// Statements that return columns yield an array of row documents; anything else
    /// yields the affected row count.
    async fn run_raw_query(
        &mut self,
        query: &Query,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<NativeValue, StrawDbError> {
        let Query::Raw(text) = query else {
            return Err(StrawDbError::BackendError(
                "sqlite raw queries must be SQL text".to_string(),
            ));
        };
        let text = text.clone();
        let params = Params::new(data, &[]);
        self.last_query = Some(text.clone());
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn.prepare(&text)?;
            let bound = params.bind_for(&stmt)?;
            if stmt.column_count() > 0 {
                let docs = collect_documents(&mut stmt, &bound)?;
                Ok(NativeValue::Array(
                    docs.into_iter().map(NativeValue::Document).collect(),
                ))
            } else {
                let affected = execute(&mut stmt, &bound)?;
                Ok(NativeValue::Int(i64::try_from(affected).unwrap_or(i64::MAX)))
            }
        })
        .await
    }

    async fn list_fields(&mut self, table: &str) -> Result<Vec<String>, StrawDbError> {
        let text = format!("PRAGMA table_info({})", sql::quote_ident(table)?);
        self.last_query = Some(text.clone());
        run_blocking(Arc::clone(&self.conn), move |conn| {
            let mut stmt = conn.prepare(&text)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    fn last_query_text(&self) -> Option<String> {
        self.last_query.clone()
    }
}
