use std::collections::BTreeSet;

use straw_model::Model;

/// How a read asks for caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CachePlan {
    Off,
    Auto,
    Keyed(String),
}

impl CachePlan {
    pub(crate) fn is_on(&self) -> bool {
        !matches!(self, CachePlan::Off)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Insert { first_id: u64, batch: u64 },
    GetOne { id: u64, cache: CachePlan },
    GetAll { limit: u64, cache: CachePlan },
    Count { cache: CachePlan },
    RawQuery { min_score: u64 },
    ListFields,
    Update { id: u64, invalidate: Option<String> },
    Delete { id: u64, invalidate: Option<String> },
    /// `get_one` with no query set.
    GetOneUnqualified,
    Sleep(u64),
}

impl Op {
    pub(crate) fn is_write(&self) -> bool {
        matches!(self, Op::Insert { .. } | Op::Update { .. } | Op::Delete { .. })
    }

    pub(crate) fn cache_plan(&self) -> Option<&CachePlan> {
        match self {
            Op::GetOne { cache, .. } | Op::GetAll { cache, .. } | Op::Count { cache } => Some(cache),
            _ => None,
        }
    }

    pub(crate) fn invalidate_key(&self) -> Option<&str> {
        match self {
            Op::Update { invalidate, .. } | Op::Delete { invalidate, .. } => invalidate.as_deref(),
            _ => None,
        }
    }
}

/// One simulated request. Each task owns its model, as a request handler would.
#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) model: Model,
}

/// Ids the oracle expects to be live in the shared store.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShadowStore {
    pub(crate) live: BTreeSet<u64>,
    pub(crate) next_id: u64,
}

impl ShadowStore {
    pub(crate) fn reserve(&mut self, batch: u64) -> u64 {
        let first = self.next_id;
        self.next_id += batch;
        first
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.live.contains(&id)
    }
}
