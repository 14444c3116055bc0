use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Virtual milliseconds; advances only when the run loop says so.
#[derive(Debug, Default)]
pub(crate) struct FakeClock {
    pub(crate) now_ms: u64,
}

/// Picks the next request task to run. Sleeping tasks park on a timer heap until the
/// clock reaches their wake time.
pub(crate) struct Scheduler {
    ready: Vec<usize>,
    sleeping: BinaryHeap<Reverse<(u64, usize)>>,
    pub(crate) clock: FakeClock,
}

impl Scheduler {
    pub(crate) fn new(task_count: usize) -> Self {
        Self {
            ready: (0..task_count).collect(),
            sleeping: BinaryHeap::new(),
            clock: FakeClock::default(),
        }
    }

    pub(crate) fn sleep(&mut self, task_id: usize, duration_ms: u64) {
        let wake_at = self.clock.now_ms.saturating_add(duration_ms.max(1));
        self.sleeping.push(Reverse((wake_at, task_id)));
    }

    pub(crate) fn mark_ready(&mut self, task_id: usize) {
        self.ready.push(task_id);
    }

    pub(crate) fn advance_time(&mut self, elapsed_ms: u64) {
        self.clock.now_ms = self.clock.now_ms.saturating_add(elapsed_ms.max(1));
        self.wake_due();
    }

    /// Remove and return a random ready task, jumping the clock forward when every
    /// task is asleep.
    pub(crate) fn next_ready(&mut self, rng: &mut ChaCha8Rng) -> Option<usize> {
        if self.ready.is_empty() {
            let Reverse((wake_at, _)) = *self.sleeping.peek()?;
            self.clock.now_ms = self.clock.now_ms.max(wake_at);
            self.wake_due();
        }
        let idx = rng.random_range(0..self.ready.len());
        Some(self.ready.swap_remove(idx))
    }

    fn wake_due(&mut self) {
        while let Some(Reverse((wake_at, task_id))) = self.sleeping.peek().copied() {
            if wake_at > self.clock.now_ms {
                break;
            }
            self.sleeping.pop();
            self.ready.push(task_id);
        }
    }
}
