//! Fluent data-access models over pluggable database drivers with a read-through cache.
//!
//! A [`StrawContext`] holds the validated configuration, the [`DriverRegistry`] and a
//! [`CacheGateway`]. Models built from it accumulate query state through chained
//! setters and run it with one terminal call per statement.

pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod driver;
pub mod error;
pub mod memory;
pub mod model;
pub mod normalize;
pub mod prelude;
pub mod query;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

pub use cache::{CacheGateway, CacheMode, MemoryCache};
pub use config::{DatabaseConfig, StrawConfig};
pub use context::StrawContext;
pub use driver::{Driver, DriverRegistry};
pub use error::{CacheError, StrawDbError};
pub use model::{Model, ModelBuilder, PendingOperation};
