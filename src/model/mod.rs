//! The fluent data-access object.
//!
//! Setters accumulate a [`PendingOperation`]; a terminal call takes it, consults the
//! cache for reads, resolves a connection for the required access mode, calls the
//! driver and returns normalized data.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use straw_model::prelude::*;
//!
//! # async fn demo() -> Result<(), StrawDbError> {
//! let config = StrawConfig::new().with_database(
//!     "default",
//!     DatabaseConfig::builder(DriverKind::Memory, "localhost").database("app").finish(),
//! );
//! let ctx = StrawContext::builder(config).build()?;
//! let mut users = ctx.model("users").build()?;
//!
//! users.insert(json!({"name": "ann", "age": 30})).await?;
//! let adults = users
//!     .query(json!({"age": {"$gte": 18}}))
//!     .order("name")
//!     .limit(10)
//!     .cache(CacheMode::Auto, Some(60))
//!     .get_all()
//!     .await?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```

mod pending;

pub use pending::PendingOperation;

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::cache::{self, CacheMode, CacheSlot, CacheTarget, derive_key};
use crate::connection::ConnectionResolver;
use crate::context::StrawContext;
use crate::driver::{Driver, InsertData, InsertResult, SelectRequest, UpdateResult};
use crate::error::StrawDbError;
use crate::normalize::{normalize, normalize_document, normalize_documents};
use crate::query::{FieldSpec, OrderSpec, Query};
use crate::types::{AccessMode, JsonMap};

/// Prefix of the schema-cache key; the table name follows.
pub const FIELD_CACHE_PREFIX: &str = "_field_table_";
/// Lifetime of a cached field list.
pub const FIELD_CACHE_TTL: u64 = 86_400;

fn into_map(value: JsonValue) -> Option<JsonMap> {
    match value {
        JsonValue::Object(map) if !map.is_empty() => Some(map),
        _ => None,
    }
}

#[derive(Serialize)]
struct CountKeyMaterial<'a> {
    pending: &'a PendingOperation,
    count_field: &'a str,
}

/// Binds a model to a table and a database tag before use.
#[must_use]
pub struct ModelBuilder {
    ctx: Arc<StrawContext>,
    table: String,
    db_tag: Option<String>,
    prefix: Option<String>,
    seed: Option<u64>,
}

impl ModelBuilder {
    pub fn new(ctx: Arc<StrawContext>, table: impl Into<String>) -> Self {
        Self {
            ctx,
            table: table.into(),
            db_tag: None,
            prefix: None,
            seed: None,
        }
    }

    /// Configuration entry to use; defaults to the context's `default_db`.
    pub fn db_tag(mut self, tag: impl Into<String>) -> Self {
        self.db_tag = Some(tag.into());
        self
    }

    /// Table prefix overriding the configured one.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Seed host selection for reproducible runs.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// # Errors
    /// - `StrawDbError::ConfigError` if the tag is not configured.
    /// - `StrawDbError::PreconditionError` if the table name is empty.
    pub fn build(self) -> Result<Model, StrawDbError> {
        if self.table.trim().is_empty() {
            return Err(StrawDbError::PreconditionError(
                "model table name is empty".to_string(),
            ));
        }
        let db_tag = self
            .db_tag
            .unwrap_or_else(|| self.ctx.config().default_db.clone());
        let cfg = self.ctx.database(&db_tag)?;
        let prefix = self.prefix.unwrap_or_else(|| cfg.prefix.clone());
        let table = if self.table.starts_with(&prefix) {
            self.table
        } else {
            format!("{prefix}{}", self.table)
        };
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Model {
            ctx: self.ctx,
            db_tag,
            table,
            pending: PendingOperation::default(),
            driver: None,
            rng,
        })
    }
}

/// Fluent query builder and data-access object over one table.
pub struct Model {
    ctx: Arc<StrawContext>,
    db_tag: String,
    table: String,
    pending: PendingOperation,
    driver: Option<Box<dyn Driver>>,
    rng: StdRng,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("db_tag", &self.db_tag)
            .field("table", &self.table)
            .field("pending", &self.pending)
            .field("driver", &self.driver.as_ref().map(|d| d.kind()))
            .finish_non_exhaustive()
    }
}

impl Model {
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn db_tag(&self) -> &str {
        &self.db_tag
    }

    /// State accumulated since the last terminal call.
    #[must_use]
    pub fn pending(&self) -> &PendingOperation {
        &self.pending
    }

    /// Text of the last statement issued by the most recently connected driver.
    #[must_use]
    pub fn last_query_text(&self) -> Option<String> {
        self.driver.as_ref().and_then(|d| d.last_query_text())
    }

    pub fn query(&mut self, query: impl Into<Query>) -> &mut Self {
        let query = query.into();
        if !query.is_empty() {
            self.pending.query = Some(query);
        }
        self
    }

    /// Named bind parameters; anything but a non-empty object is ignored.
    pub fn data(&mut self, data: impl Into<JsonValue>) -> &mut Self {
        if let Some(map) = into_map(data.into()) {
            self.pending.data = Some(map);
        }
        self
    }

    pub fn field(&mut self, field: impl Into<FieldSpec>) -> &mut Self {
        let field = field.into();
        if !field.is_all() {
            self.pending.field = Some(field);
        }
        self
    }

    pub fn order(&mut self, order: impl Into<OrderSpec>) -> &mut Self {
        let order = order.into();
        if !order.is_empty() {
            self.pending.order = Some(order);
        }
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        if offset > 0 {
            self.pending.offset = Some(offset);
        }
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        if limit > 0 {
            self.pending.limit = Some(limit);
        }
        self
    }

    pub fn options(&mut self, options: impl Into<JsonValue>) -> &mut Self {
        if let Some(map) = into_map(options.into()) {
            self.pending.options = Some(map);
        }
        self
    }

    /// Cache the next read. `ttl` of `None` falls back to the configured default;
    /// a zero or missing TTL leaves caching off.
    pub fn cache(&mut self, mode: impl Into<CacheMode>, ttl: Option<u64>) -> &mut Self {
        let ttl = ttl.or_else(|| self.ctx.default_cache_ttl()).unwrap_or(0);
        if ttl > 0 {
            self.pending.cache = Some(CacheSlot {
                mode: mode.into(),
                ttl,
            });
        }
        self
    }

    /// Insert one object or an array of objects.
    ///
    /// # Errors
    /// `StrawDbError::PreconditionError` for any other JSON shape, otherwise any driver
    /// or connection-resolution error.
    pub async fn insert(&mut self, data: impl Into<JsonValue>) -> Result<InsertResult, StrawDbError> {
        let pending = self.take_pending();
        let options = pending.options_or_default();
        let data = InsertData::from_json(data.into())?;

        let mut driver = self.connect(AccessMode::Write)?;
        let result = driver.insert(&data, &options).await;
        self.driver = Some(driver);
        result
    }

    /// Fetch the first matching record.
    ///
    /// # Errors
    /// `StrawDbError::PreconditionError` when no query was set, checked before the cache
    /// or any driver is touched. Otherwise any driver error.
    pub async fn get_one(&mut self) -> Result<Option<JsonValue>, StrawDbError> {
        let pending = self.take_pending();
        let Some(query) = pending.query.as_ref() else {
            return Err(StrawDbError::PreconditionError(
                "get_one requires a query condition".to_string(),
            ));
        };

        let target = self.cache_target(&pending, "get_one", None)?;
        if let Some(hit) = self.cached::<Option<JsonValue>>(target.as_ref()).await {
            return Ok(hit);
        }

        let fields = pending.field.clone().unwrap_or_default();
        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Read)?;
        let result = driver.get_one(query, &fields, &data, &options).await;
        self.driver = Some(driver);

        let record = result?.as_ref().map(normalize_document);
        self.remember(target.as_ref(), &record).await;
        Ok(record)
    }

    /// # Errors
    /// Any driver or connection-resolution error.
    pub async fn get_all(&mut self) -> Result<Vec<JsonValue>, StrawDbError> {
        let pending = self.take_pending();
        let target = self.cache_target(&pending, "get_all", None)?;
        if let Some(hit) = self.cached::<Vec<JsonValue>>(target.as_ref()).await {
            return Ok(hit);
        }

        let fields = pending.field.clone().unwrap_or_default();
        let order = pending.order.clone().unwrap_or_default();
        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Read)?;
        let result = driver
            .get_all(SelectRequest {
                query: pending.query.as_ref(),
                fields: &fields,
                order: &order,
                offset: pending.offset,
                limit: pending.limit,
                data: &data,
                options: &options,
            })
            .await;
        self.driver = Some(driver);

        let records = normalize_documents(&result?);
        self.remember(target.as_ref(), &records).await;
        Ok(records)
    }

    /// Count matching records; `field` of `"*"` (or empty) counts rows, anything else
    /// counts non-null values of that field.
    ///
    /// # Errors
    /// Any driver or connection-resolution error.
    pub async fn count(&mut self, field: &str) -> Result<u64, StrawDbError> {
        let pending = self.take_pending();
        let field = if field.trim().is_empty() { "*" } else { field.trim() };
        let target = self.cache_target(&pending, "count", Some(field))?;
        if let Some(hit) = self.cached::<u64>(target.as_ref()).await {
            return Ok(hit);
        }

        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Read)?;
        let result = driver
            .count(pending.query.as_ref(), field, &data, &options)
            .await;
        self.driver = Some(driver);

        let n = result?;
        self.remember(target.as_ref(), &n).await;
        Ok(n)
    }

    /// Apply `set` to records matching `criteria`, deleting `invalidate_key` from the
    /// cache first.
    ///
    /// # Errors
    /// `StrawDbError::PreconditionError` if `set` is not a non-empty object, otherwise
    /// any driver error.
    pub async fn update(
        &mut self,
        set: impl Into<JsonValue>,
        criteria: impl Into<Query>,
        invalidate_key: Option<&str>,
    ) -> Result<UpdateResult, StrawDbError> {
        let pending = self.take_pending();
        let Some(set) = into_map(set.into()) else {
            return Err(StrawDbError::PreconditionError(
                "update requires a non-empty object of fields to set".to_string(),
            ));
        };
        let criteria = criteria.into();
        self.invalidate(invalidate_key).await;

        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Write)?;
        let result = driver.update(&set, &criteria, &data, &options).await;
        self.driver = Some(driver);
        result
    }

    /// Delete records matching `criteria`, deleting `invalidate_key` from the cache first.
    ///
    /// # Errors
    /// Any driver or connection-resolution error.
    pub async fn delete(
        &mut self,
        criteria: impl Into<Query>,
        invalidate_key: Option<&str>,
    ) -> Result<u64, StrawDbError> {
        let pending = self.take_pending();
        let criteria = criteria.into();
        self.invalidate(invalidate_key).await;

        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Write)?;
        let result = driver.delete(&criteria, &data, &options).await;
        self.driver = Some(driver);
        result
    }

    /// Hand the pending query to the driver verbatim.
    ///
    /// # Errors
    /// `StrawDbError::PreconditionError` when no query was set, otherwise any driver error.
    pub async fn run_raw_query(&mut self) -> Result<JsonValue, StrawDbError> {
        let pending = self.take_pending();
        let Some(query) = pending.query.as_ref() else {
            return Err(StrawDbError::PreconditionError(
                "run_raw_query requires a query".to_string(),
            ));
        };

        let target = self.cache_target(&pending, "run_raw_query", None)?;
        if let Some(hit) = self.cached::<JsonValue>(target.as_ref()).await {
            return Ok(hit);
        }

        let data = pending.data_or_default();
        let options = pending.options_or_default();
        let mut driver = self.connect(AccessMode::Read)?;
        let result = driver.run_raw_query(query, &data, &options).await;
        self.driver = Some(driver);

        let value = normalize(&result?);
        self.remember(target.as_ref(), &value).await;
        Ok(value)
    }

    /// Column names of `table` (this model's table by default).
    ///
    /// Cached under `_field_table_<table>` for a day; debug mode skips the cache so
    /// schema changes show up immediately. Pending state is left untouched.
    ///
    /// # Errors
    /// Any driver or connection-resolution error.
    pub async fn list_fields(&mut self, table: Option<&str>) -> Result<Vec<String>, StrawDbError> {
        let table = table.unwrap_or(&self.table).to_string();
        let target = (!self.ctx.debug()).then(|| CacheTarget {
            key: format!("{FIELD_CACHE_PREFIX}{table}"),
            ttl: FIELD_CACHE_TTL,
        });
        if let Some(hit) = self.cached::<Vec<String>>(target.as_ref()).await {
            return Ok(hit);
        }

        let mut driver = self.connect(AccessMode::Read)?;
        let result = driver.list_fields(&table).await;
        self.driver = Some(driver);

        let fields = result?;
        self.remember(target.as_ref(), &fields).await;
        Ok(fields)
    }

    fn take_pending(&mut self) -> PendingOperation {
        std::mem::take(&mut self.pending)
    }

    fn connect(&mut self, mode: AccessMode) -> Result<Box<dyn Driver>, StrawDbError> {
        let cfg = self.ctx.database(&self.db_tag)?;
        ConnectionResolver::new(self.ctx.registry()).connect(cfg, mode, &self.table, &mut self.rng)
    }

    /// Resolve the cache slot of `pending` into a concrete key, if any.
    fn cache_target(
        &self,
        pending: &PendingOperation,
        operation: &str,
        count_field: Option<&str>,
    ) -> Result<Option<CacheTarget>, StrawDbError> {
        let Some(slot) = pending.cache.as_ref() else {
            return Ok(None);
        };
        let key = match &slot.mode {
            CacheMode::Off => return Ok(None),
            CacheMode::Keyed(key) => key.clone(),
            CacheMode::Auto => {
                let key = match count_field {
                    Some(count_field) => derive_key(
                        &self.table,
                        operation,
                        &CountKeyMaterial {
                            pending,
                            count_field,
                        },
                    )?,
                    None => derive_key(&self.table, operation, pending)?,
                };
                debug!(table = %self.table, operation, key = %key, "derived cache key");
                key
            }
        };
        Ok(Some(CacheTarget { key, ttl: slot.ttl }))
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, target: Option<&CacheTarget>) -> Option<T> {
        let target = target?;
        cache::fetch(self.ctx.cache(), &target.key).await
    }

    async fn remember<T: Serialize + ?Sized>(&self, target: Option<&CacheTarget>, value: &T) {
        if let Some(target) = target {
            cache::store(self.ctx.cache(), &target.key, value, target.ttl).await;
        }
    }

    async fn invalidate(&self, key: Option<&str>) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            cache::invalidate(self.ctx.cache(), key).await;
        }
    }
}
