//! Turning a named configuration into one connected driver.

use std::fmt;

use rand::Rng;
use tracing::debug;

use crate::config::{DatabaseConfig, split_list};
use crate::driver::{Driver, DriverRegistry};
use crate::error::StrawDbError;
use crate::types::AccessMode;

/// Everything a driver needs to open one connection to one host.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub prefix: String,
}

// Keep credentials out of logs.
impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ConnectionProfile {
    /// `host:port`, or just the host when no port is configured.
    #[must_use]
    pub fn address(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }
}

/// Entry `index` of a parallel list, falling back to entry 0 when the list is
/// shorter or the entry is blank.
fn pick(list: &[String], index: usize) -> String {
    list.get(index)
        .filter(|value| !value.is_empty())
        .or_else(|| list.first())
        .cloned()
        .unwrap_or_default()
}

/// Build one profile per configured host.
///
/// # Errors
/// Returns `StrawDbError::ConfigError` when the host list is empty or a port does not parse.
pub fn build_profiles(cfg: &DatabaseConfig) -> Result<Vec<ConnectionProfile>, StrawDbError> {
    let hosts = split_list(&cfg.host);
    if hosts.is_empty() {
        return Err(StrawDbError::ConfigError(
            "database configuration has no host".to_string(),
        ));
    }
    let ports = split_list(&cfg.port);
    let users = split_list(&cfg.user);
    let passwords = split_list(&cfg.password);

    hosts
        .into_iter()
        .enumerate()
        .map(|(i, host)| -> Result<ConnectionProfile, StrawDbError> {
            let port = pick(&ports, i);
            let port = if port.is_empty() {
                None
            } else {
                Some(port.parse::<u16>().map_err(|_| {
                    StrawDbError::ConfigError(format!("invalid port '{port}' for host '{host}'"))
                })?)
            };
            Ok(ConnectionProfile {
                host,
                port,
                username: pick(&users, i),
                password: pick(&passwords, i),
                database: cfg.database.clone(),
                charset: cfg.charset.clone(),
                prefix: cfg.prefix.clone(),
            })
        })
        .collect()
}

/// Uniformly pick one replica without touching the caller's list.
pub fn pick_read_replica<'a, R: Rng + ?Sized>(
    replicas: &'a [ConnectionProfile],
    rng: &mut R,
) -> Option<&'a ConnectionProfile> {
    if replicas.is_empty() {
        return None;
    }
    replicas.get(rng.random_range(0..replicas.len()))
}

/// Choose the profile serving `mode`.
///
/// With `write_master`, profile 0 takes every write and reads go to a random profile
/// among the rest. Without it every profile is eligible for both modes.
pub fn select_profile<'a, R: Rng + ?Sized>(
    profiles: &'a [ConnectionProfile],
    mode: AccessMode,
    write_master: bool,
    rng: &mut R,
) -> Option<&'a ConnectionProfile> {
    match profiles {
        [] => None,
        [only] => Some(only),
        [master, replicas @ ..] if write_master => match mode {
            AccessMode::Write => Some(master),
            AccessMode::Read => pick_read_replica(replicas, rng),
        },
        all => pick_read_replica(all, rng),
    }
}

/// Resolves configuration plus access mode into a driver bound to a table.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionResolver<'a> {
    registry: &'a DriverRegistry,
}

impl<'a> ConnectionResolver<'a> {
    #[must_use]
    pub fn new(registry: &'a DriverRegistry) -> Self {
        Self { registry }
    }

    /// Open a driver for `mode` and select `table` on it.
    ///
    /// # Errors
    /// - `StrawDbError::DriverNotFound` if no constructor is registered for the kind.
    /// - `StrawDbError::ConfigError` if the host lists are malformed.
    /// - any error the driver constructor or `select_table` returns.
    pub fn connect<R: Rng + ?Sized>(
        &self,
        cfg: &DatabaseConfig,
        mode: AccessMode,
        table: &str,
        rng: &mut R,
    ) -> Result<Box<dyn Driver>, StrawDbError> {
        let factory = self
            .registry
            .get(cfg.kind)
            .ok_or(StrawDbError::DriverNotFound(cfg.kind))?;

        let profiles = build_profiles(cfg)?;
        let profile = select_profile(&profiles, mode, cfg.write_master, rng).ok_or_else(|| {
            StrawDbError::ConfigError("no connection profile available".to_string())
        })?;
        debug!(
            kind = %cfg.kind,
            %mode,
            address = %profile.address(),
            table,
            "resolved connection"
        );

        let mut driver = factory(profile)?;
        driver.select_table(table)?;
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DriverKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn cluster(write_master: bool) -> DatabaseConfig {
        DatabaseConfig::builder(DriverKind::Memory, "h0,h1,h2")
            .port("5000")
            .user("root,reader,")
            .password("secret")
            .database("app")
            .write_master(write_master)
            .finish()
    }

    #[test]
    fn short_lists_broadcast_entry_zero() {
        let profiles = build_profiles(&cluster(true)).unwrap();
        assert_eq!(profiles.len(), 3);
        assert!(profiles.iter().all(|p| p.port == Some(5000)));
        assert_eq!(profiles[1].username, "reader");
        assert_eq!(profiles[2].username, "root");
        assert!(profiles.iter().all(|p| p.password == "secret"));
    }

    #[test]
    fn blank_entries_fall_back_to_first() {
        let cfg = DatabaseConfig::builder(DriverKind::Memory, "a,b")
            .port("10,")
            .finish();
        let profiles = build_profiles(&cfg).unwrap();
        assert_eq!(profiles[1].port, Some(10));
    }

    #[test]
    fn write_master_splits_reads_and_writes() {
        let profiles = build_profiles(&cluster(true)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let w = select_profile(&profiles, AccessMode::Write, true, &mut rng).unwrap();
            assert_eq!(w.host, "h0");
            let r = select_profile(&profiles, AccessMode::Read, true, &mut rng).unwrap();
            assert_ne!(r.host, "h0");
            assert_eq!(r.port, Some(5000));
        }
    }

    #[test]
    fn without_master_every_host_is_eligible() {
        let profiles = build_profiles(&cluster(false)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..300 {
            let p = select_profile(&profiles, AccessMode::Write, false, &mut rng).unwrap();
            seen.insert(p.host.clone());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn single_host_serves_both_modes() {
        let cfg = DatabaseConfig::builder(DriverKind::Memory, "only").finish();
        let profiles = build_profiles(&cfg).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for mode in [AccessMode::Read, AccessMode::Write] {
            for master in [true, false] {
                let p = select_profile(&profiles, mode, master, &mut rng).unwrap();
                assert_eq!(p.host, "only");
                assert_eq!(p.port, None);
            }
        }
    }

    #[test]
    fn unknown_kind_is_driver_not_found() {
        let registry = DriverRegistry::empty();
        let resolver = ConnectionResolver::new(&registry);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = resolver
            .connect(&cluster(true), AccessMode::Read, "t", &mut rng)
            .err()
            .unwrap();
        assert!(matches!(err, StrawDbError::DriverNotFound(DriverKind::Memory)));
    }

    #[test]
    fn password_is_not_debug_printed() {
        let profiles = build_profiles(&cluster(true)).unwrap();
        assert!(!format!("{:?}", profiles[0]).contains("secret"));
    }
}
