use crate::backend::{Observed, Probe, SimError, StepOutcome};
use crate::model::{Op, ShadowStore};

/// Where reads and writes are allowed to land.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    pub(crate) hosts: Vec<String>,
    pub(crate) write_master: bool,
}

impl Topology {
    fn split(&self) -> bool {
        self.write_master && self.hosts.len() > 1
    }
}

pub(crate) struct Oracle;

impl Oracle {
    /// Check one step against the model protocol. `shadow` is the state before the step.
    pub(crate) fn check(
        op: &Op,
        outcome: &StepOutcome,
        topology: &Topology,
        shadow: &ShadowStore,
    ) -> Result<(), String> {
        if !outcome.pending_clear {
            return Err(format!("pending state survived {op:?}"));
        }
        if let Op::Sleep(_) = op {
            return Self::expect_silent(op, outcome);
        }
        if let Op::GetOneUnqualified = op {
            return match &outcome.result {
                Err(SimError::Precondition(_)) => Self::expect_silent(op, outcome),
                other => Err(format!("get_one without a query returned {other:?}")),
            };
        }

        Self::check_routing(op, outcome, topology)?;
        Self::check_cache_protocol(op, outcome)?;
        Self::check_invalidation(op, outcome)?;
        Self::check_results(op, outcome, shadow)
    }

    fn expect_silent(op: &Op, outcome: &StepOutcome) -> Result<(), String> {
        if outcome.probes.is_empty() {
            Ok(())
        } else {
            Err(format!("{op:?} touched cache or driver: {:?}", outcome.probes))
        }
    }

    fn driver_calls(outcome: &StepOutcome) -> impl Iterator<Item = (usize, &str)> {
        outcome.probes.iter().enumerate().filter_map(|(idx, probe)| match probe {
            Probe::Driver { host, .. } => Some((idx, host.as_str())),
            _ => None,
        })
    }

    fn check_routing(op: &Op, outcome: &StepOutcome, topology: &Topology) -> Result<(), String> {
        let calls: Vec<_> = Self::driver_calls(outcome).collect();
        if calls.len() > 1 {
            return Err(format!("{op:?} made {} driver calls", calls.len()));
        }
        let Some((_, host)) = calls.first() else {
            return Ok(());
        };
        if !topology.hosts.iter().any(|h| h == host) {
            return Err(format!("{op:?} reached unknown host {host}"));
        }
        if topology.split() {
            let master = &topology.hosts[0];
            if op.is_write() && host != master {
                return Err(format!("write {op:?} went to replica {host}"));
            }
            if !op.is_write() && host == master {
                return Err(format!("read {op:?} went to master {host}"));
            }
        }
        Ok(())
    }

    fn check_cache_protocol(op: &Op, outcome: &StepOutcome) -> Result<(), String> {
        let gets: Vec<_> = outcome
            .probes
            .iter()
            .filter_map(|p| match p {
                Probe::CacheGet { key, hit } => Some((key.as_str(), *hit)),
                _ => None,
            })
            .collect();
        let sets = outcome
            .probes
            .iter()
            .filter(|p| matches!(p, Probe::CacheSet { .. }))
            .count();
        let driver_calls = Self::driver_calls(outcome).count();

        let cached = match op {
            Op::ListFields => true,
            other => other.cache_plan().is_some_and(|plan| plan.is_on()),
        };
        if !cached {
            if !gets.is_empty() || sets > 0 {
                return Err(format!("uncached {op:?} used the cache: {:?}", outcome.probes));
            }
            return Ok(());
        }

        match gets.as_slice() {
            [(key, true)] => {
                if driver_calls > 0 || sets > 0 {
                    return Err(format!("cache hit on {key} still reached the driver"));
                }
            }
            [(key, false)] => {
                if outcome.result.is_ok() && (driver_calls != 1 || sets != 1) {
                    return Err(format!(
                        "cache miss on {key} made {driver_calls} driver calls and {sets} sets"
                    ));
                }
                if let Some(Probe::CacheSet { key: stored }) = outcome.probes.last() {
                    if stored != key {
                        return Err(format!("looked up {key} but stored {stored}"));
                    }
                }
            }
            other => return Err(format!("{op:?} made cache lookups {other:?}")),
        }
        Ok(())
    }

    fn check_invalidation(op: &Op, outcome: &StepOutcome) -> Result<(), String> {
        let deletes: Vec<_> = outcome
            .probes
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| match p {
                Probe::CacheDelete { key } => Some((idx, key.as_str())),
                _ => None,
            })
            .collect();
        match (op.invalidate_key(), deletes.as_slice()) {
            (None, []) => Ok(()),
            (Some(expected), [(idx, key)]) => {
                if key != &expected {
                    return Err(format!("invalidated {key} instead of {expected}"));
                }
                match Self::driver_calls(outcome).next() {
                    Some((driver_idx, _)) if driver_idx < *idx => {
                        Err(format!("{op:?} wrote before invalidating {key}"))
                    }
                    _ => Ok(()),
                }
            }
            (expected, seen) => Err(format!(
                "{op:?} expected invalidation {expected:?}, saw {seen:?}"
            )),
        }
    }

    fn check_results(op: &Op, outcome: &StepOutcome, shadow: &ShadowStore) -> Result<(), String> {
        let observed = match &outcome.result {
            Ok(observed) => observed,
            Err(err) => return Err(format!("{op:?} failed: {err:?}")),
        };
        let hit = outcome
            .probes
            .iter()
            .any(|p| matches!(p, Probe::CacheGet { hit: true, .. }));
        if hit {
            return Ok(());
        }

        let expected = match op {
            Op::Insert { batch, .. } => Observed::Inserted(*batch as usize),
            Op::GetOne { id, .. } => Observed::Found(shadow.contains(*id).then_some(*id)),
            Op::GetAll { limit, .. } => Observed::Rows(shadow.live.len().min(*limit as usize)),
            Op::Count { .. } => Observed::Counted(shadow.live.len() as u64),
            Op::Update { id, .. } => Observed::Updated(u64::from(shadow.contains(*id))),
            Op::Delete { id, .. } => Observed::Deleted(u64::from(shadow.contains(*id))),
            Op::RawQuery { .. } | Op::ListFields => return Ok(()),
            Op::Sleep(_) | Op::GetOneUnqualified => Observed::Nothing,
        };
        if *observed == expected {
            Ok(())
        } else {
            Err(format!("{op:?} observed {observed:?}, expected {expected:?}"))
        }
    }
}
