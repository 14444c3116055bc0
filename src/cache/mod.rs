//! Cache gateway contract and the read-through helpers the model uses.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Key-value store with per-entry TTL.
///
/// Implementations may be remote; every failure is reported as `CacheError` and the
/// model degrades to a miss instead of failing the call.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` for `ttl_secs` seconds; `0` keeps it until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// How a read should be cached.
///
/// ```rust
/// use straw_model::prelude::*;
///
/// assert_eq!(CacheMode::from(true), CacheMode::Auto);
/// assert_eq!(CacheMode::from(""), CacheMode::Off);
/// assert_eq!(CacheMode::from("user:1"), CacheMode::Keyed("user:1".into()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Off,
    /// Derive the key from the table, operation and pending state.
    Auto,
    Keyed(String),
}

impl From<bool> for CacheMode {
    fn from(value: bool) -> Self {
        if value { CacheMode::Auto } else { CacheMode::Off }
    }
}

impl From<&str> for CacheMode {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CacheMode::Off
        } else {
            CacheMode::Keyed(value.to_string())
        }
    }
}

impl From<String> for CacheMode {
    fn from(value: String) -> Self {
        if value.is_empty() {
            CacheMode::Off
        } else {
            CacheMode::Keyed(value)
        }
    }
}

/// A reserved cache slot: the mode plus a non-zero TTL in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSlot {
    pub mode: CacheMode,
    pub ttl: u64,
}

/// A resolved key and TTL for one terminal call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTarget {
    pub key: String,
    pub ttl: u64,
}

/// Deterministic key: lower-case hex SHA-256 over table, operation and the serialized state.
///
/// # Errors
/// Returns `serde_json::Error` if `material` cannot be serialized.
pub fn derive_key<T: Serialize + ?Sized>(
    table: &str,
    operation: &str,
    material: &T,
) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(b"::");
    hasher.update(operation.as_bytes());
    hasher.update(b"::");
    hasher.update(serde_json::to_vec(material)?);
    let digest = hasher.finalize();

    let mut key = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail.
        let _ = write!(key, "{byte:02x}");
    }
    Ok(key)
}

/// Read and decode a cached value. Gateway and decode failures count as misses.
pub async fn fetch<T: DeserializeOwned>(gateway: &dyn CacheGateway, key: &str) -> Option<T> {
    let bytes = match gateway.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!(key, "cache miss");
            return None;
        }
        Err(err) => {
            warn!(key, error = %err, "cache read failed, treating as miss");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => {
            debug!(key, "cache hit");
            Some(value)
        }
        Err(err) => {
            warn!(key, error = %err, "cached payload undecodable, treating as miss");
            None
        }
    }
}

/// Encode and write a value; failures are logged and swallowed.
pub async fn store<T: Serialize + ?Sized>(
    gateway: &dyn CacheGateway,
    key: &str,
    value: &T,
    ttl: u64,
) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key, error = %err, "cache value could not be encoded");
            return;
        }
    };
    if let Err(err) = gateway.set(key, bytes, ttl).await {
        warn!(key, error = %err, "cache write failed");
    }
}

/// Delete a key; failures are logged and swallowed.
pub async fn invalidate(gateway: &dyn CacheGateway, key: &str) {
    match gateway.delete(key).await {
        Ok(()) => debug!(key, "cache invalidated"),
        Err(err) => warn!(key, error = %err, "cache delete failed"),
    }
}
