//! In-process document-store driver.
//!
//! Documents carry an `_id` object id assigned on insert. Conditions are JSON filter
//! documents (equality plus `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//! `$exists`); raw query text must itself be such a JSON document.

pub mod filter;
mod store;

pub use store::MemoryStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::connection::ConnectionProfile;
use crate::driver::{Driver, InsertData, InsertResult, SelectRequest, UpdateResult};
use crate::error::StrawDbError;
use crate::query::{FieldSpec, Query};
use crate::types::{Document, DriverKind, JsonMap, NativeValue, ObjectId};
use filter::{
    as_number, from_extended_json, is_operator_doc, matches, object_to_document, resolve_filter,
    sort_documents,
};

const ID_FIELD: &str = "_id";

pub struct MemoryDriver {
    store: MemoryStore,
    database: String,
    table: Option<String>,
    last_query: Option<String>,
}

impl MemoryDriver {
    #[must_use]
    pub fn connect(store: MemoryStore, profile: &ConnectionProfile) -> Self {
        let database = if profile.database.is_empty() {
            "default".to_string()
        } else {
            profile.database.clone()
        };
        Self {
            store,
            database,
            table: None,
            last_query: None,
        }
    }

    fn table(&self) -> Result<&str, StrawDbError> {
        self.table
            .as_deref()
            .ok_or_else(|| StrawDbError::BackendError("no collection selected".to_string()))
    }

    fn record(&mut self, text: String) {
        self.last_query = Some(text);
    }

    /// Matching documents in storage order.
    fn find(&self, filter: &JsonMap) -> Result<Vec<Document>, StrawDbError> {
        let table = self.table()?;
        let docs = self.store.documents(&self.database, table);
        let mut out = Vec::new();
        for doc in docs {
            if matches(&doc, filter)? {
                out.push(doc);
            }
        }
        Ok(out)
    }
}

fn project(doc: Document, fields: &FieldSpec) -> Document {
    if fields.is_all() {
        return doc;
    }
    let wanted = fields.columns();
    doc.into_iter()
        .filter(|(k, _)| k == ID_FIELD || wanted.iter().any(|w| w == k))
        .collect()
}

fn json_text(map: &JsonMap) -> String {
    JsonValue::Object(map.clone()).to_string()
}

fn option_u64(options: &JsonMap, name: &str) -> Option<u64> {
    options.get(name).and_then(JsonValue::as_u64)
}

fn option_bool(options: &JsonMap, name: &str, default: bool) -> bool {
    options.get(name).and_then(JsonValue::as_bool).unwrap_or(default)
}

/// Write `value` at a dotted `path`, creating intermediate documents as needed.
fn set_path(doc: &mut Document, path: &str, value: NativeValue) -> Result<(), StrawDbError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };
    let mut current = doc;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| NativeValue::Document(Document::new()));
        current = match slot {
            NativeValue::Document(inner) => inner,
            other => {
                return Err(StrawDbError::BackendError(format!(
                    "cannot create field {path}: {part} holds {other:?}"
                )));
            }
        };
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

fn remove_path(doc: &mut Document, path: &str) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        doc.remove(path);
        return;
    };
    let mut current = doc;
    for part in parents.split('.') {
        match current.get_mut(part) {
            Some(NativeValue::Document(inner)) => current = inner,
            _ => return,
        }
    }
    current.remove(leaf);
}

fn increment(current: &NativeValue, step: &NativeValue, path: &str) -> Result<NativeValue, StrawDbError> {
    if let (NativeValue::Int(a), NativeValue::Int(b)) = (current, step) {
        return a.checked_add(*b).map(NativeValue::Int).ok_or_else(|| {
            StrawDbError::BackendError(format!("$inc on {path} overflows a 64-bit integer"))
        });
    }
    match (as_number(current), as_number(step)) {
        (Some(a), Some(b)) => Ok(NativeValue::Float(a + b)),
        _ => Err(StrawDbError::BackendError(format!(
            "cannot $inc non-numeric field {path}"
        ))),
    }
}

/// Apply an update document. Plain fields mean `$set`; `$set`, `$inc` and `$unset`
/// are understood and dotted keys address nested fields. Returns whether the
/// document changed.
fn apply_update(doc: &mut Document, set: &JsonMap) -> Result<bool, StrawDbError> {
    let before = doc.clone();
    let has_operators = set.keys().any(|k| k.starts_with('$'));
    if !has_operators {
        for (k, v) in set {
            set_path(doc, k, from_extended_json(v)?)?;
        }
        return Ok(*doc != before);
    }

    for (op, fields) in set {
        let JsonValue::Object(fields) = fields else {
            return Err(StrawDbError::BackendError(format!(
                "{op} expects a document, got {fields}"
            )));
        };
        match op.as_str() {
            "$set" => {
                for (k, v) in fields {
                    set_path(doc, k, from_extended_json(v)?)?;
                }
            }
            "$unset" => {
                for k in fields.keys() {
                    remove_path(doc, k);
                }
            }
            "$inc" => {
                for (k, v) in fields {
                    let step = from_extended_json(v)?;
                    let current = filter::lookup(doc, k)
                        .cloned()
                        .unwrap_or(NativeValue::Int(0));
                    set_path(doc, k, increment(&current, &step, k)?)?;
                }
            }
            other => {
                return Err(StrawDbError::BackendError(format!(
                    "unsupported update operator {other}"
                )));
            }
        }
    }
    Ok(*doc != before)
}

#[async_trait]
impl Driver for MemoryDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Memory
    }

    fn select_table(&mut self, table: &str) -> Result<(), StrawDbError> {
        if table.trim().is_empty() {
            return Err(StrawDbError::BackendError(
                "collection name is empty".to_string(),
            ));
        }
        self.table = Some(table.to_string());
        Ok(())
    }

    async fn insert(
        &mut self,
        data: &InsertData,
        _options: &JsonMap,
    ) -> Result<InsertResult, StrawDbError> {
        let table = self.table()?.to_string();
        let mut docs = Vec::with_capacity(data.rows().len());
        let mut ids = Vec::with_capacity(data.rows().len());
        for row in data.rows() {
            let mut doc = object_to_document(row)?;
            let id = doc
                .entry(ID_FIELD.to_string())
                .or_insert_with(|| NativeValue::ObjectId(ObjectId::new()))
                .clone();
            ids.push(id);
            docs.push(doc);
        }

        let affected = docs.len() as u64;
        self.store.with_tables(&self.database, |tables| {
            tables.entry(table.clone()).or_default().extend(docs);
        });
        self.record(format!("db.{table}.insert({} documents)", affected));
        Ok(InsertResult {
            inserted_ids: ids,
            affected,
        })
    }

    async fn get_one(
        &mut self,
        query: &Query,
        fields: &FieldSpec,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<Option<Document>, StrawDbError> {
        let filter = resolve_filter(Some(query), data)?;
        let table = self.table()?.to_string();
        let found = self.find(&filter)?.into_iter().next();
        self.record(format!("db.{table}.findOne({})", json_text(&filter)));
        Ok(found.map(|doc| project(doc, fields)))
    }

    async fn get_all(&mut self, request: SelectRequest<'_>) -> Result<Vec<Document>, StrawDbError> {
        let filter = resolve_filter(request.query, request.data)?;
        let table = self.table()?.to_string();
        let mut docs = self.find(&filter)?;
        sort_documents(&mut docs, request.order);

        let offset = usize::try_from(request.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = request
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let out: Vec<Document> = docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|doc| project(doc, request.fields))
            .collect();

        let mut text = format!("db.{table}.find({})", json_text(&filter));
        if !request.order.is_empty() {
            let keys: Vec<String> = request
                .order
                .keys()
                .iter()
                .map(|k| format!("{}:{:?}", k.column, k.direction))
                .collect();
            text.push_str(&format!(".sort({})", keys.join(",")));
        }
        if let Some(offset) = request.offset {
            text.push_str(&format!(".skip({offset})"));
        }
        if let Some(limit) = request.limit {
            text.push_str(&format!(".limit({limit})"));
        }
        self.record(text);
        Ok(out)
    }

    async fn count(
        &mut self,
        query: Option<&Query>,
        count_field: &str,
        data: &JsonMap,
        _options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        let filter = resolve_filter(query, data)?;
        let table = self.table()?.to_string();
        let docs = self.find(&filter)?;
        let n = if count_field == "*" {
            docs.len()
        } else {
            docs.iter()
                .filter(|doc| filter::lookup(doc, count_field).is_some_and(|v| !v.is_null()))
                .count()
        };
        self.record(format!("db.{table}.count({}, {count_field})", json_text(&filter)));
        Ok(n as u64)
    }

    async fn update(
        &mut self,
        set: &JsonMap,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<UpdateResult, StrawDbError> {
        let filter = resolve_filter(Some(criteria), data)?;
        let table = self.table()?.to_string();
        let multi = option_bool(options, "multi", true);
        let upsert = option_bool(options, "upsert", false);

        let outcome = self.store.with_tables(&self.database, |tables| -> Result<UpdateResult, StrawDbError> {
            let docs = tables.entry(table.clone()).or_default();
            let mut result = UpdateResult::default();
            // Stage every change first so a failing document leaves the table untouched.
            let mut staged = Vec::new();
            for (idx, doc) in docs.iter().enumerate() {
                if !matches(doc, &filter)? {
                    continue;
                }
                result.matched += 1;
                let mut next = doc.clone();
                if apply_update(&mut next, set)? {
                    result.modified += 1;
                    staged.push((idx, next));
                }
                if !multi {
                    break;
                }
            }
            for (idx, next) in staged {
                docs[idx] = next;
            }

            if result.matched == 0 && upsert {
                let mut doc = Document::new();
                for (k, v) in &filter {
                    let is_condition = matches!(v, JsonValue::Object(o) if is_operator_doc(o));
                    if !k.starts_with('$') && !is_condition {
                        set_path(&mut doc, k, from_extended_json(v)?)?;
                    }
                }
                apply_update(&mut doc, set)?;
                let id = doc
                    .entry(ID_FIELD.to_string())
                    .or_insert_with(|| NativeValue::ObjectId(ObjectId::new()))
                    .clone();
                docs.push(doc);
                result.upserted_id = Some(id);
            }
            Ok(result)
        })?;

        self.record(format!(
            "db.{table}.update({}, {})",
            json_text(&filter),
            json_text(set)
        ));
        Ok(outcome)
    }

    async fn delete(
        &mut self,
        criteria: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<u64, StrawDbError> {
        let filter = resolve_filter(Some(criteria), data)?;
        let table = self.table()?.to_string();
        let limit = option_u64(options, "limit").unwrap_or(u64::MAX);

        let removed = self.store.with_tables(&self.database, |tables| -> Result<u64, StrawDbError> {
            let docs = tables.entry(table.clone()).or_default();
            // Decide every document first so a bad filter leaves the collection intact.
            let mut keep = Vec::with_capacity(docs.len());
            let mut removed = 0u64;
            for doc in docs.iter() {
                let hit = removed < limit && matches(doc, &filter)?;
                if hit {
                    removed += 1;
                }
                keep.push(!hit);
            }
            let mut keep = keep.into_iter();
            docs.retain(|_| keep.next().unwrap_or(true));
            Ok(removed)
        })?;

        self.record(format!("db.{table}.remove({})", json_text(&filter)));
        Ok(removed)
    }

    async fn run_raw_query(
        &mut self,
        query: &Query,
        data: &JsonMap,
        options: &JsonMap,
    ) -> Result<NativeValue, StrawDbError> {
        let filter = resolve_filter(Some(query), data)?;
        let table = self.table()?.to_string();
        let mut docs = self.find(&filter)?;
        if let Some(limit) = option_u64(options, "limit") {
            docs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        self.record(format!("db.{table}.aggregate({})", json_text(&filter)));
        Ok(NativeValue::Array(
            docs.into_iter().map(NativeValue::Document).collect(),
        ))
    }

    async fn list_fields(&mut self, table: &str) -> Result<Vec<String>, StrawDbError> {
        let docs = self.store.documents(&self.database, table);
        let fields: BTreeSet<String> = docs.iter().flat_map(|doc| doc.keys().cloned()).collect();
        self.record(format!("db.{table}.fields()"));
        Ok(fields.into_iter().collect())
    }

    fn last_query_text(&self) -> Option<String> {
        self.last_query.clone()
    }
}
