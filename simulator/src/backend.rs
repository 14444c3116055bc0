use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use straw_model::prelude::*;
use tokio::runtime::Runtime;

use crate::args::SimConfig;
use crate::model::{CachePlan, Op, TaskState};

pub(crate) const TABLE: &str = "items";

/// Something the model did against the cache or a driver during one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Probe {
    CacheGet { key: String, hit: bool },
    CacheSet { key: String },
    CacheDelete { key: String },
    Driver { op: &'static str, host: String },
}

impl Probe {
    pub(crate) fn label(&self) -> String {
        match self {
            Probe::CacheGet { key, hit: true } => format!("cache.hit:{key}"),
            Probe::CacheGet { key, hit: false } => format!("cache.miss:{key}"),
            Probe::CacheSet { key } => format!("cache.set:{key}"),
            Probe::CacheDelete { key } => format!("cache.delete:{key}"),
            Probe::Driver { op, host } => format!("driver.{op}@{host}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ProbeLog(Arc<Mutex<Vec<Probe>>>);

impl ProbeLog {
    fn push(&self, probe: Probe) {
        self.0.lock().expect("probe log lock").push(probe);
    }

    fn drain(&self) -> Vec<Probe> {
        std::mem::take(&mut *self.0.lock().expect("probe log lock"))
    }
}

struct ProbedCache {
    inner: MemoryCache,
    probes: ProbeLog,
}

#[async_trait]
impl CacheGateway for ProbedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self.inner.get(key).await?;
        self.probes.push(Probe::CacheGet {
            key: key.to_string(),
            hit: value.is_some(),
        });
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
        self.probes.push(Probe::CacheSet { key: key.to_string() });
        self.inner.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.probes.push(Probe::CacheDelete { key: key.to_string() });
        self.inner.delete(key).await
    }
}

struct ProbedDriver {
    inner: MemoryDriver,
    host: String,
    probes: ProbeLog,
}

impl ProbedDriver {
    fn probe(&self, op: &'static str) {
        self.probes.push(Probe::Driver {
            op,
            host: self.host.clone(),
        });
    }
}

#[async_trait]
impl Driver for ProbedDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn select_table(&mut self, table: &str) -> Result<(), StrawDbError> {
        self.inner.select_table(table)
    }

    async fn insert(&mut self, data: &InsertData, options: &JsonMap) -> Result<InsertResult, StrawDbError> {
        self.probe("insert");
        self.inner.insert(data, options).await
    }

    async fn get_one(
        &mut self,
        query: &Query,
        fields: &FieldSpec,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<Option<Document>, StrawDbError> {
        self.probe("get_one");
        self.inner.get_one(query, fields, data, options).await
    }

    async fn get_all(&mut self, request: SelectRequest<'_>) -> Result<Vec<Document>, StrawDbError> {
        self.probe("get_all");
        self.inner.get_all(request).await
    }

    async fn count(
        &mut self,
        query: Option<&Query>,
        count_field: &str,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        self.probe("count");
        self.inner.count(query, count_field, data, options).await
    }

    async fn update(
        &mut self,
        set: &JsonMap,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<UpdateResult, StrawDbError> {
        self.probe("update");
        self.inner.update(set, criteria, data, options).await
    }

    async fn delete(&mut self, criteria: &Query, data: &JsonMap, options: &JsonMap) -> Result<u64, StrawDbError> {
        self.probe("delete");
        self.inner.delete(criteria, data, options).await
    }

    async fn run_raw_query(
        &mut self,
        query: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<NativeValue, StrawDbError> {
        self.probe("run_raw_query");
        self.inner.run_raw_query(query, data, options).await
    }

    async fn list_fields(&mut self, table: &str) -> Result<Vec<String>, StrawDbError> {
        self.probe("list_fields");
        self.inner.list_fields(table).await
    }

    fn last_query_text(&self) -> Option<String> {
        self.inner.last_query_text()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SimError {
    Precondition(String),
    Other(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Precondition(msg) => write!(f, "precondition: {msg}"),
            SimError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl From<StrawDbError> for SimError {
    fn from(err: StrawDbError) -> Self {
        match err {
            StrawDbError::PreconditionError(msg) => SimError::Precondition(msg),
            other => SimError::Other(other.to_string()),
        }
    }
}

/// What a terminal call returned, reduced to what the oracle compares.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observed {
    Nothing,
    Inserted(usize),
    Found(Option<u64>),
    Rows(usize),
    Counted(u64),
    Updated(u64),
    Deleted(u64),
    Fields(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) struct StepOutcome {
    pub(crate) result: Result<Observed, SimError>,
    pub(crate) probes: Vec<Probe>,
    pub(crate) pending_clear: bool,
}

/// Owns the context every task's model is built from and the runtime that drives them.
pub(crate) struct BackendShim {
    ctx: Arc<StrawContext>,
    probes: ProbeLog,
    runtime: Runtime,
}

impl BackendShim {
    pub(crate) fn new(config: &SimConfig) -> Result<Self, String> {
        let probes = ProbeLog::default();
        let store = MemoryStore::new();

        let mut registry = DriverRegistry::empty();
        let driver_probes = probes.clone();
        registry.register(DriverKind::Memory, move |profile| {
            Ok(Box::new(ProbedDriver {
                inner: MemoryDriver::connect(store.clone(), profile),
                host: profile.host.clone(),
                probes: driver_probes.clone(),
            }) as Box<dyn Driver>)
        });

        let db = DatabaseConfig::builder(DriverKind::Memory, config.host_names().join(","))
            .database("sim")
            .write_master(config.write_master)
            .finish();
        let straw_config = StrawConfig::new()
            .with_database(DEFAULT_DB_TAG, db)
            .with_default_cache_ttl(Some(3600));
        let ctx = StrawContext::builder(straw_config)
            .registry(registry)
            .cache(Arc::new(ProbedCache {
                inner: MemoryCache::new(),
                probes: probes.clone(),
            }))
            .build()
            .map_err(|err| format!("context rejected: {err}"))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| format!("runtime: {err}"))?;

        Ok(Self { ctx, probes, runtime })
    }

    pub(crate) fn task(&self, id: usize, seed: u64) -> Result<TaskState, String> {
        let model = self
            .ctx
            .model(TABLE)
            .seed(seed)
            .build()
            .map_err(|err| format!("task {id} model: {err}"))?;
        Ok(TaskState { model })
    }

    pub(crate) fn apply(&mut self, task: &mut TaskState, op: &Op) -> StepOutcome {
        self.probes.drain();
        let model = &mut task.model;
        let result = self.runtime.block_on(run_op(model, op));
        StepOutcome {
            result: result.map_err(SimError::from),
            probes: self.probes.drain(),
            pending_clear: model.pending().is_empty(),
        }
    }
}

fn apply_cache(model: &mut Model, plan: &CachePlan) {
    match plan {
        CachePlan::Off => {}
        CachePlan::Auto => {
            model.cache(CacheMode::Auto, None);
        }
        CachePlan::Keyed(key) => {
            model.cache(key.as_str(), None);
        }
    }
}

async fn run_op(model: &mut Model, op: &Op) -> Result<Observed, StrawDbError> {
    match op {
        Op::Sleep(_) => Ok(Observed::Nothing),
        Op::Insert { first_id, batch } => {
            let rows: Vec<_> = (*first_id..first_id + batch)
                .map(|id| json!({"id": id, "score": id % 17, "tags": ["sim"]}))
                .collect();
            let result = model.insert(rows).await?;
            Ok(Observed::Inserted(result.inserted_ids.len()))
        }
        Op::GetOne { id, cache } => {
            model.query(json!({"id": id})).field("id,score");
            apply_cache(model, cache);
            let row = model.get_one().await?;
            Ok(Observed::Found(
                row.as_ref().and_then(|r| r.get("id")).and_then(|v| v.as_u64()),
            ))
        }
        Op::GetAll { limit, cache } => {
            model.order("id asc").limit(*limit);
            apply_cache(model, cache);
            Ok(Observed::Rows(model.get_all().await?.len()))
        }
        Op::Count { cache } => {
            apply_cache(model, cache);
            Ok(Observed::Counted(model.count("*").await?))
        }
        Op::RawQuery { min_score } => {
            let raw = json!({"score": {"$gte": min_score}}).to_string();
            let value = model.query(raw).run_raw_query().await?;
            Ok(Observed::Rows(value.as_array().map_or(0, Vec::len)))
        }
        Op::ListFields => Ok(Observed::Fields(model.list_fields(None).await?)),
        Op::Update { id, invalidate } => {
            let result = model
                .update(
                    json!({"$inc": {"score": 1}}),
                    json!({"id": id}),
                    invalidate.as_deref(),
                )
                .await?;
            Ok(Observed::Updated(result.matched))
        }
        Op::Delete { id, invalidate } => {
            let n = model.delete(json!({"id": id}), invalidate.as_deref()).await?;
            Ok(Observed::Deleted(n))
        }
        Op::GetOneUnqualified => {
            model.limit(1);
            model.get_one().await.map(|_| Observed::Nothing)
        }
    }
}
