use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::connection::ConnectionProfile;
use crate::error::StrawDbError;
use crate::memory::{MemoryDriver, MemoryStore};
use crate::normalize::normalize;
use crate::query::{FieldSpec, OrderSpec, Query};
use crate::types::{Document, DriverKind, JsonMap, NativeValue};

/// Rows handed to `Driver::insert`: one document or a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertData(pub Vec<JsonMap>);

impl InsertData {
    #[must_use]
    pub fn rows(&self) -> &[JsonMap] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(JsonMap::is_empty)
    }

    /// Accept an object or an array of objects.
    ///
    /// # Errors
    /// Returns `StrawDbError::PreconditionError` for any other JSON shape.
    pub fn from_json(value: JsonValue) -> Result<Self, StrawDbError> {
        match value {
            JsonValue::Object(map) => Ok(InsertData(vec![map])),
            JsonValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(StrawDbError::PreconditionError(format!(
                        "insert rows must be objects, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(InsertData),
            other => Err(StrawDbError::PreconditionError(format!(
                "insert data must be an object or a list of objects, got {other}"
            ))),
        }
    }
}

impl From<JsonMap> for InsertData {
    fn from(value: JsonMap) -> Self {
        InsertData(vec![value])
    }
}

impl From<Vec<JsonMap>> for InsertData {
    fn from(value: Vec<JsonMap>) -> Self {
        InsertData(value)
    }
}

/// Backend-native outcome of an insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    pub inserted_ids: Vec<NativeValue>,
    pub affected: u64,
}

impl InsertResult {
    #[must_use]
    pub fn normalized_ids(&self) -> Vec<JsonValue> {
        self.inserted_ids.iter().map(normalize).collect()
    }
}

/// Backend-native outcome of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<NativeValue>,
}

/// Everything a multi-row read needs.
#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
    pub query: Option<&'a Query>,
    pub fields: &'a FieldSpec,
    pub order: &'a OrderSpec,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub data: &'a JsonMap,
    pub options: &'a JsonMap,
}

/// The capability set every backend implements.
///
/// A driver instance is bound to one connection profile and, after `select_table`,
/// to one table. Errors are returned unchanged to the model's caller.
#[async_trait]
pub trait Driver: Send {
    fn kind(&self) -> DriverKind;

    /// Bind subsequent calls to `table`.
    ///
    /// # Errors
    /// Returns `StrawDbError::BackendError` if the backend rejects the name.
    fn select_table(&mut self, table: &str) -> Result<(), StrawDbError>;

    async fn insert(
        &mut self,
        data: &InsertData,
        options: &JsonMap,
    ) -> Result<InsertResult, StrawDbError>;

    async fn get_one(
        &mut self,
        query: &Query,
        fields: &FieldSpec,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<Option<Document>, StrawDbError>;

    async fn get_all(&mut self, request: SelectRequest<'_>) -> Result<Vec<Document>, StrawDbError>;

    /// Count matching records; `count_field` is `*` or a field that must be non-null.
    async fn count(
        &mut self,
        query: Option<&Query>,
        count_field: &str,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<u64, StrawDbError>;

    async fn update(
        &mut self,
        set: &JsonMap,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<UpdateResult, StrawDbError>;

    async fn delete(
        &mut self,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<u64, StrawDbError>;

    async fn run_raw_query(
        &mut self,
        query: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<NativeValue, StrawDbError>;

    async fn list_fields(&mut self, table: &str) -> Result<Vec<String>, StrawDbError>;

    /// Text of the last statement this driver issued.
    fn last_query_text(&self) -> Option<String>;
}

/// Constructor stored in the registry.
pub type DriverFactory =
    Arc<dyn Fn(&ConnectionProfile) -> Result<Box<dyn Driver>, StrawDbError> + Send + Sync>;

/// Lookup table from configured backend kind to driver constructor.
///
/// Built once at startup; `with_builtin` registers the drivers compiled into the crate.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<DriverKind, DriverFactory>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.factories.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("DriverRegistry").field("kinds", &kinds).finish()
    }
}

impl DriverRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in `sqlite` (feature-gated) and `memory` drivers.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "sqlite")]
        registry.register(DriverKind::Sqlite, |profile| {
            Ok(Box::new(crate::sqlite::SqliteDriver::connect(profile)?) as Box<dyn Driver>)
        });
        registry.register_memory(MemoryStore::new());
        registry
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: DriverKind, factory: F) -> &mut Self
    where
        F: Fn(&ConnectionProfile) -> Result<Box<dyn Driver>, StrawDbError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
        self
    }

    /// Register the document driver over a caller-held store.
    pub fn register_memory(&mut self, store: MemoryStore) -> &mut Self {
        self.register(DriverKind::Memory, move |profile| {
            Ok(Box::new(MemoryDriver::connect(store.clone(), profile)) as Box<dyn Driver>)
        })
    }

    #[must_use]
    pub fn get(&self, kind: DriverKind) -> Option<&DriverFactory> {
        self.factories.get(&kind)
    }

    #[must_use]
    pub fn contains(&self, kind: DriverKind) -> bool {
        self.factories.contains_key(&kind)
    }
}
