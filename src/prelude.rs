//! Convenient imports for common functionality.
//!
//! This module re-exports the types most applications need to configure a context,
//! build models and implement a custom driver or cache gateway.

pub use crate::cache::{CacheGateway, CacheMode, CacheSlot, MemoryCache};
pub use crate::config::{DEFAULT_DB_TAG, DatabaseConfig, DatabaseConfigBuilder, StrawConfig};
pub use crate::connection::{ConnectionProfile, ConnectionResolver, select_profile};
pub use crate::context::{StrawContext, StrawContextBuilder};
pub use crate::driver::{
    Driver, DriverFactory, DriverRegistry, InsertData, InsertResult, SelectRequest, UpdateResult,
};
pub use crate::error::{CacheError, StrawDbError};
pub use crate::memory::{MemoryDriver, MemoryStore};
pub use crate::model::{Model, ModelBuilder, PendingOperation};
pub use crate::normalize::{normalize, normalize_document, normalize_documents};
pub use crate::query::{FieldSpec, OrderSpec, Query, SortDirection, SortKey};
pub use crate::types::{AccessMode, Document, DriverKind, JsonMap, NativeValue, ObjectId};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteDriver;
