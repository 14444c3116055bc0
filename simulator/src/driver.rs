use std::fmt;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::args::SimConfig;
use crate::backend::{BackendShim, Observed, Probe};
use crate::logging::EventLog;
use crate::model::{CachePlan, Op, ShadowStore, TaskState};
use crate::oracle::{Oracle, Topology};
use crate::scheduler::Scheduler;

/// Counters reported when a run finishes without an oracle failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) steps: u64,
    pub(crate) elapsed_ms: u64,
    pub(crate) live: usize,
    pub(crate) cache_hits: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steps={} time={}ms live={} cache_hits={}",
            self.steps, self.elapsed_ms, self.live, self.cache_hits
        )
    }
}

/// Drive the tasks until the step or time limit. The first oracle failure dumps the
/// retained event log and ends the run with its reason.
pub(crate) fn run(config: &SimConfig, rng: &mut ChaCha8Rng) -> Result<RunSummary, String> {
    let mut events = EventLog::new(config.first_steps, config.tail_steps);

    let mut backend = BackendShim::new(config).map_err(|reason| failure(&events, reason))?;
    let mut tasks: Vec<TaskState> = Vec::with_capacity(config.tasks);
    for id in 0..config.tasks {
        let task = backend
            .task(id, rng.random())
            .map_err(|reason| failure(&events, reason))?;
        tasks.push(task);
    }
    let topology = Topology {
        hosts: config.host_names(),
        write_master: config.write_master,
    };
    let mut shadow = ShadowStore::default();
    let mut scheduler = Scheduler::new(config.tasks);

    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut step: u64 = 0;
    let mut hits: u64 = 0;
    while step < max_steps && scheduler.clock.now_ms <= max_time {
        let Some(task_id) = scheduler.next_ready(rng) else {
            break;
        };
        let op = next_op(&mut shadow, config, rng);
        let outcome = backend.apply(&mut tasks[task_id], &op);

        let result_label = match &outcome.result {
            Ok(observed) => format!("Ok({observed:?})"),
            Err(err) => format!("Err({err})"),
        };
        events.record(format!(
            "step={} time={}ms task={} op={} probes=[{}] result={}",
            step,
            scheduler.clock.now_ms,
            task_id,
            format_op(&op),
            outcome
                .probes
                .iter()
                .map(Probe::label)
                .collect::<Vec<_>>()
                .join(" "),
            result_label
        ));

        Oracle::check(&op, &outcome, &topology, &shadow).map_err(|reason| failure(&events, reason))?;

        if outcome
            .probes
            .iter()
            .any(|p| matches!(p, Probe::CacheGet { hit: true, .. }))
        {
            hits += 1;
        }
        match (&op, &outcome.result) {
            (Op::Insert { first_id, batch }, Ok(_)) => {
                shadow.live.extend(*first_id..first_id + batch);
            }
            (Op::Delete { id, .. }, Ok(Observed::Deleted(_))) => {
                shadow.live.remove(id);
            }
            _ => {}
        }

        if let Op::Sleep(ms) = op {
            scheduler.sleep(task_id, ms);
        } else {
            scheduler.mark_ready(task_id);
        }
        scheduler.advance_time(1);
        step += 1;
    }

    Ok(RunSummary {
        steps: step,
        elapsed_ms: scheduler.clock.now_ms,
        live: shadow.live.len(),
        cache_hits: hits,
    })
}

fn failure(events: &EventLog, reason: String) -> String {
    events.dump_failure(&reason);
    reason
}

fn next_op(shadow: &mut ShadowStore, config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
    if rng.random::<f64>() < config.sleep_rate {
        return Op::Sleep(rng.random_range(1..=50));
    }
    if rng.random::<f64>() < config.misuse_rate {
        return Op::GetOneUnqualified;
    }

    // Mostly known ids, sometimes one that was never inserted.
    let id = if shadow.next_id == 0 || rng.random_bool(0.1) {
        shadow.next_id + rng.random_range(0..8)
    } else {
        rng.random_range(0..shadow.next_id)
    };

    if rng.random::<f64>() < config.write_rate {
        let invalidate = (rng.random::<f64>() < config.invalidate_rate).then(|| one_key(id));
        let weights = [
            (WriteKind::Insert, 0.5),
            (WriteKind::Update, 0.3),
            (WriteKind::Delete, 0.2),
        ];
        return match choose_weighted(&weights, rng) {
            WriteKind::Insert => {
                let batch = rng.random_range(1..=4);
                Op::Insert {
                    first_id: shadow.reserve(batch),
                    batch,
                }
            }
            WriteKind::Update => Op::Update { id, invalidate },
            WriteKind::Delete => Op::Delete { id, invalidate },
        };
    }

    let weights = [
        (ReadKind::GetOne, 0.4),
        (ReadKind::GetAll, 0.2),
        (ReadKind::Count, 0.2),
        (ReadKind::RawQuery, 0.1),
        (ReadKind::ListFields, 0.1),
    ];
    match choose_weighted(&weights, rng) {
        ReadKind::GetOne => Op::GetOne {
            id,
            cache: cache_plan(one_key(id), config, rng),
        },
        ReadKind::GetAll => {
            let limit = rng.random_range(1..=20);
            Op::GetAll {
                limit,
                cache: cache_plan(format!("sim:all:{limit}"), config, rng),
            }
        }
        ReadKind::Count => Op::Count {
            cache: cache_plan("sim:count".to_string(), config, rng),
        },
        ReadKind::RawQuery => Op::RawQuery {
            min_score: rng.random_range(0..17),
        },
        ReadKind::ListFields => Op::ListFields,
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy)]
enum ReadKind {
    GetOne,
    GetAll,
    Count,
    RawQuery,
    ListFields,
}

fn cache_plan(key: String, config: &SimConfig, rng: &mut ChaCha8Rng) -> CachePlan {
    if rng.random::<f64>() >= config.cache_rate {
        CachePlan::Off
    } else if rng.random_bool(0.5) {
        CachePlan::Auto
    } else {
        CachePlan::Keyed(key)
    }
}

fn one_key(id: u64) -> String {
    format!("sim:one:{id}")
}

fn choose_weighted<T: Copy>(items: &[(T, f64)], rng: &mut ChaCha8Rng) -> T {
    let total: f64 = items.iter().map(|(_, weight)| weight.max(0.0)).sum();
    let mut target = rng.random::<f64>() * total;
    for (item, weight) in items {
        let w = weight.max(0.0);
        if target <= w {
            return *item;
        }
        target -= w;
    }
    items[items.len() - 1].0
}

fn format_op(op: &Op) -> String {
    match op {
        Op::Sleep(ms) => format!("Sleep({ms}ms)"),
        other => format!("{other:?}"),
    }
}
