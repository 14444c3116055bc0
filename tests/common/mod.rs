#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use straw_model::prelude::*;

/// Ordered log of cache and driver calls shared by one test.
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.all().iter().position(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Memory cache that logs `cache.<op>:<key>` before delegating.
pub struct RecordingCache {
    pub inner: MemoryCache,
    pub events: Events,
}

#[async_trait]
impl CacheGateway for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.events.push(format!("cache.get:{key}"));
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
        self.events.push(format!("cache.set:{key}"));
        self.inner.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.events.push(format!("cache.delete:{key}"));
        self.inner.delete(key).await
    }
}

/// Document driver that logs `driver.<op>@<host>` for every call.
pub struct CountingDriver {
    inner: MemoryDriver,
    host: String,
    events: Events,
}

impl CountingDriver {
    fn log(&self, op: &str) {
        self.events.push(format!("driver.{op}@{}", self.host));
    }
}

#[async_trait]
impl Driver for CountingDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn select_table(&mut self, table: &str) -> Result<(), StrawDbError> {
        self.inner.select_table(table)
    }

    async fn insert(&mut self, data: &InsertData, options: &JsonMap) -> Result<InsertResult, StrawDbError> {
        self.log("insert");
        self.inner.insert(data, options).await
    }

    async fn get_one(
        &mut self,
        query: &Query,
        fields: &FieldSpec,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<Option<Document>, StrawDbError> {
        self.log("get_one");
        self.inner.get_one(query, fields, data, options).await
    }

    async fn get_all(&mut self, request: SelectRequest<'_>) -> Result<Vec<Document>, StrawDbError> {
        self.log("get_all");
        if let Some(limit) = request.limit {
            self.events.push(format!("driver.limit={limit}"));
        }
        self.inner.get_all(request).await
    }

    async fn count(
        &mut self,
        query: Option<&Query>,
        count_field: &str,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        self.log("count");
        self.inner.count(query, count_field, data, options).await
    }

    async fn update(
        &mut self,
        set: &JsonMap,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<UpdateResult, StrawDbError> {
        self.log("update");
        self.inner.update(set, criteria, data, options).await
    }

    async fn delete(&mut self, criteria: &Query, data: &JsonMap, options: &JsonMap) -> Result<u64, StrawDbError> {
        self.log("delete");
        self.inner.delete(criteria, data, options).await
    }

    async fn run_raw_query(
        &mut self,
        query: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<NativeValue, StrawDbError> {
        self.log("run_raw_query");
        self.inner.run_raw_query(query, data, options).await
    }

    async fn list_fields(&mut self, table: &str) -> Result<Vec<String>, StrawDbError> {
        self.log("list_fields");
        self.inner.list_fields(table).await
    }

    fn last_query_text(&self) -> Option<String> {
        self.inner.last_query_text()
    }
}

pub struct Harness {
    pub ctx: Arc<StrawContext>,
    pub events: Events,
    pub store: MemoryStore,
}

impl Harness {
    pub fn model(&self, table: &str) -> Model {
        self.ctx.model(table).seed(7).build().unwrap()
    }
}

/// Context over a counting document driver and a recording cache.
pub fn harness(db: DatabaseConfig, debug: bool) -> Harness {
    let events = Events::default();
    let store = MemoryStore::new();

    let mut registry = DriverRegistry::empty();
    let driver_events = events.clone();
    let driver_store = store.clone();
    registry.register(DriverKind::Memory, move |profile| {
        Ok(Box::new(CountingDriver {
            inner: MemoryDriver::connect(driver_store.clone(), profile),
            host: profile.host.clone(),
            events: driver_events.clone(),
        }) as Box<dyn Driver>)
    });

    let cache = Arc::new(RecordingCache {
        inner: MemoryCache::new(),
        events: events.clone(),
    });
    let config = StrawConfig::new()
        .with_database(DEFAULT_DB_TAG, db)
        .with_default_cache_ttl(Some(300))
        .with_debug(debug);
    let ctx = StrawContext::builder(config)
        .registry(registry)
        .cache(cache)
        .build()
        .unwrap();
    Harness { ctx, events, store }
}

pub fn single_host() -> DatabaseConfig {
    DatabaseConfig::builder(DriverKind::Memory, "solo")
        .database("app")
        .finish()
}
