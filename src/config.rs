use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StrawDbError;
use crate::types::DriverKind;

/// Tag used when a model does not name a database.
pub const DEFAULT_DB_TAG: &str = "default";

fn default_charset() -> String {
    "UTF8".to_string()
}

fn default_db_tag() -> String {
    DEFAULT_DB_TAG.to_string()
}

/// Accept `"3306"`, `3306` or `"3306,3307"` for list-valued fields.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Split a comma-separated configuration value into trimmed entries.
///
/// An empty (or all-whitespace) value yields an empty list.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim().to_string()).collect()
}

/// One named database entry.
///
/// `host`, `port`, `user` and `password` are comma-separated lists; entry *i* of a
/// parallel list pairs with host *i* and a shorter list falls back to entry 0.
/// Keys from the legacy `DB_*` configuration files are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(alias = "DB_TYPE")]
    pub kind: DriverKind,
    #[serde(alias = "DB_HOST")]
    pub host: String,
    #[serde(default, alias = "DB_PORT", deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(default, alias = "DB_USER")]
    pub user: String,
    #[serde(default, alias = "DB_PWD")]
    pub password: String,
    #[serde(default, alias = "DB_NAME")]
    pub database: String,
    #[serde(default, alias = "DB_PREFIX")]
    pub prefix: String,
    #[serde(default = "default_charset", alias = "DB_CHARSET")]
    pub charset: String,
    #[serde(default, alias = "WRITE_MASTER")]
    pub write_master: bool,
}

impl DatabaseConfig {
    #[must_use]
    pub fn builder(kind: DriverKind, host: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(kind, host)
    }

    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        split_list(&self.host)
    }

    /// Check the list invariants of this entry.
    ///
    /// # Errors
    /// Returns `StrawDbError::ConfigError` naming `tag` when the host list is empty,
    /// a parallel list has an unsupported length, or a port is not a number.
    pub fn validate(&self, tag: &str) -> Result<(), StrawDbError> {
        let hosts = self.hosts();
        if hosts.is_empty() || hosts.iter().any(String::is_empty) {
            return Err(StrawDbError::ConfigError(format!(
                "database '{tag}' has an empty host entry"
            )));
        }

        for (name, raw) in [
            ("port", &self.port),
            ("user", &self.user),
            ("password", &self.password),
        ] {
            let len = split_list(raw).len();
            if len > 1 && len != hosts.len() {
                return Err(StrawDbError::ConfigError(format!(
                    "database '{tag}': {name} list has {len} entries for {} hosts",
                    hosts.len()
                )));
            }
        }

        for port in split_list(&self.port) {
            if !port.is_empty() && port.parse::<u16>().is_err() {
                return Err(StrawDbError::ConfigError(format!(
                    "database '{tag}': invalid port '{port}'"
                )));
            }
        }
        Ok(())
    }
}

/// Fluent builder for `DatabaseConfig`.
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    cfg: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    #[must_use]
    pub fn new(kind: DriverKind, host: impl Into<String>) -> Self {
        Self {
            cfg: DatabaseConfig {
                kind,
                host: host.into(),
                port: String::new(),
                user: String::new(),
                password: String::new(),
                database: String::new(),
                prefix: String::new(),
                charset: default_charset(),
                write_master: false,
            },
        }
    }

    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.cfg.port = port.into();
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.cfg.user = user.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.cfg.password = password.into();
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.cfg.database = database.into();
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cfg.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.cfg.charset = charset.into();
        self
    }

    #[must_use]
    pub fn write_master(mut self, write_master: bool) -> Self {
        self.cfg.write_master = write_master;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseConfig {
        self.cfg
    }
}

/// Process-wide settings: every database entry plus cache defaults.
///
/// Loaded once at startup and frozen inside a `StrawContext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrawConfig {
    #[serde(default = "default_db_tag")]
    pub default_db: String,
    /// TTL used by `cache(..)` calls that pass no TTL. `None` disables those calls.
    #[serde(default)]
    pub default_cache_ttl: Option<u64>,
    /// Debug mode bypasses the schema cache so table changes show up immediately.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
}

impl Default for StrawConfig {
    fn default() -> Self {
        Self {
            default_db: default_db_tag(),
            default_cache_ttl: None,
            debug: false,
            databases: HashMap::new(),
        }
    }
}

impl StrawConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    /// Returns `StrawDbError::ConfigError` if the document is malformed or an entry
    /// fails validation.
    pub fn from_json_str(json: &str) -> Result<Self, StrawDbError> {
        let cfg: StrawConfig = serde_json::from_str(json)
            .map_err(|e| StrawDbError::ConfigError(format!("invalid configuration: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    /// Returns `StrawDbError::Io` if the file cannot be read, otherwise as `from_json_str`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StrawDbError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[must_use]
    pub fn with_database(mut self, tag: impl Into<String>, cfg: DatabaseConfig) -> Self {
        self.databases.insert(tag.into(), cfg);
        self
    }

    #[must_use]
    pub fn with_default_db(mut self, tag: impl Into<String>) -> Self {
        self.default_db = tag.into();
        self
    }

    #[must_use]
    pub fn with_default_cache_ttl(mut self, ttl: Option<u64>) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate every database entry.
    ///
    /// # Errors
    /// Returns the first `StrawDbError::ConfigError` found.
    pub fn validate(&self) -> Result<(), StrawDbError> {
        for (tag, db) in &self.databases {
            db.validate(tag)?;
        }
        Ok(())
    }

    /// Look up the entry for `tag`.
    ///
    /// # Errors
    /// Returns `StrawDbError::ConfigError` if no entry exists.
    pub fn database(&self, tag: &str) -> Result<&DatabaseConfig, StrawDbError> {
        self.databases.get(tag).ok_or_else(|| {
            StrawDbError::ConfigError(format!("no database configuration for tag '{tag}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lists() {
        assert_eq!(split_list("a, b ,c"), vec!["a", "b", "c"]);
        assert!(split_list("  ").is_empty());
        assert_eq!(split_list("10"), vec!["10"]);
    }

    #[test]
    fn parses_legacy_keys() {
        let json = r#"{
            "default_db": "main",
            "default_cache_ttl": 30,
            "databases": {
                "main": {
                    "DB_TYPE": "sqlite",
                    "DB_HOST": "/tmp/a,/tmp/b",
                    "DB_PORT": 10,
                    "DB_NAME": "app",
                    "DB_PREFIX": "t_",
                    "WRITE_MASTER": true
                }
            }
        }"#;
        let cfg = StrawConfig::from_json_str(json).unwrap();
        let main = cfg.database("main").unwrap();
        assert_eq!(main.kind, DriverKind::Sqlite);
        assert_eq!(main.port, "10");
        assert_eq!(main.charset, "UTF8");
        assert!(main.write_master);
        assert_eq!(cfg.default_cache_ttl, Some(30));
    }

    #[test]
    fn rejects_mismatched_list_lengths() {
        let db = DatabaseConfig::builder(DriverKind::Memory, "a,b,c")
            .port("1,2")
            .finish();
        assert!(matches!(db.validate("x"), Err(StrawDbError::ConfigError(_))));
    }

    #[test]
    fn rejects_empty_hosts_and_bad_ports() {
        let db = DatabaseConfig::builder(DriverKind::Memory, "a,,c").finish();
        assert!(db.validate("x").is_err());

        let db = DatabaseConfig::builder(DriverKind::Memory, "a").port("http").finish();
        assert!(db.validate("x").is_err());
    }

    #[test]
    fn missing_tag_is_config_error() {
        let cfg = StrawConfig::new();
        assert!(matches!(
            cfg.database("nope"),
            Err(StrawDbError::ConfigError(_))
        ));
    }
}
