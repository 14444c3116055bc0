use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::Document;

type Tables = HashMap<String, Vec<Document>>;

/// Shared backing data for the in-process document driver.
///
/// Keyed by database name only, so every host of a multi-host configuration sees the
/// same collections, like an instantly replicated cluster. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    databases: Arc<Mutex<HashMap<String, Tables>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Tables>> {
        match self.databases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` against the collections of `database`, creating it on first use.
    pub fn with_tables<T>(&self, database: &str, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut guard = self.lock();
        let tables = guard.entry(database.to_string()).or_default();
        f(tables)
    }

    /// Snapshot of one collection.
    #[must_use]
    pub fn documents(&self, database: &str, table: &str) -> Vec<Document> {
        self.with_tables(database, |tables| tables.get(table).cloned().unwrap_or_default())
    }

    /// Drop every collection of every database.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
