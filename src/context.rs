use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheGateway, MemoryCache};
use crate::config::{DatabaseConfig, StrawConfig};
use crate::driver::DriverRegistry;
use crate::error::StrawDbError;
use crate::model::ModelBuilder;

/// Process-wide runtime handle: settings, database configurations, driver registry
/// and cache gateway.
///
/// Built and validated once at startup, immutable afterwards, shared by `Arc`.
#[derive(Clone)]
pub struct StrawContext {
    config: Arc<StrawConfig>,
    registry: Arc<DriverRegistry>,
    cache: Arc<dyn CacheGateway>,
}

impl fmt::Debug for StrawContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrawContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl StrawContext {
    #[must_use]
    pub fn builder(config: StrawConfig) -> StrawContextBuilder {
        StrawContextBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &StrawConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    #[must_use]
    pub fn cache(&self) -> &dyn CacheGateway {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.config.debug
    }

    #[must_use]
    pub fn default_cache_ttl(&self) -> Option<u64> {
        self.config.default_cache_ttl
    }

    /// # Errors
    /// Returns `StrawDbError::ConfigError` if `tag` is not configured.
    pub fn database(&self, tag: &str) -> Result<&DatabaseConfig, StrawDbError> {
        self.config.database(tag)
    }

    /// Start building a model over `table` on this context.
    #[must_use]
    pub fn model(self: &Arc<Self>, table: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(Arc::clone(self), table)
    }
}

/// Fluent builder for `StrawContext`.
#[must_use]
pub struct StrawContextBuilder {
    config: StrawConfig,
    registry: Option<DriverRegistry>,
    cache: Option<Arc<dyn CacheGateway>>,
}

impl StrawContextBuilder {
    pub fn new(config: StrawConfig) -> Self {
        Self {
            config,
            registry: None,
            cache: None,
        }
    }

    /// Replace the built-in driver registry.
    pub fn registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `cache` instead of a fresh `MemoryCache`.
    pub fn cache(mut self, cache: Arc<dyn CacheGateway>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the configuration and freeze it.
    ///
    /// # Errors
    /// Returns `StrawDbError::ConfigError` naming the first invalid entry.
    pub fn build(self) -> Result<Arc<StrawContext>, StrawDbError> {
        self.config.validate()?;
        Ok(Arc::new(StrawContext {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry.unwrap_or_else(DriverRegistry::with_builtin)),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn CacheGateway>),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DriverKind;

    #[test]
    fn build_validates_config() {
        let bad = StrawConfig::new().with_database(
            "default",
            DatabaseConfig::builder(DriverKind::Memory, "a,b")
                .port("1,2,3")
                .finish(),
        );
        assert!(matches!(
            StrawContext::builder(bad).build(),
            Err(StrawDbError::ConfigError(_))
        ));

        let good = StrawConfig::new()
            .with_database("default", DatabaseConfig::builder(DriverKind::Memory, "a").finish())
            .with_default_cache_ttl(Some(30));
        let ctx = StrawContext::builder(good).build().unwrap();
        assert_eq!(ctx.default_cache_ttl(), Some(30));
        assert!(ctx.database("default").is_ok());
        assert!(ctx.database("missing").is_err());
        assert!(ctx.registry().contains(DriverKind::Memory));
    }
}
