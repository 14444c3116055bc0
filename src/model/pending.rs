use serde::Serialize;

use crate::cache::CacheSlot;
use crate::query::{FieldSpec, OrderSpec, Query};
use crate::types::JsonMap;

/// State accumulated by the fluent setters and consumed by one terminal call.
///
/// `None` always means "not set"; a setter given an empty or zero argument leaves
/// its field `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingOperation {
    pub query: Option<Query>,
    pub data: Option<JsonMap>,
    pub field: Option<FieldSpec>,
    pub order: Option<OrderSpec>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub options: Option<JsonMap>,
    pub cache: Option<CacheSlot>,
}

impl PendingOperation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Bind parameters, defaulting to an empty map.
    #[must_use]
    pub fn data_or_default(&self) -> JsonMap {
        self.data.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn options_or_default(&self) -> JsonMap {
        self.options.clone().unwrap_or_default()
    }
}
