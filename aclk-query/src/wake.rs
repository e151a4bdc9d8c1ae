//! Wake channel between queue producers and idle query threads.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Condition signal with a generation counter.
///
/// A worker reads the generation before draining the queue and waits only
/// while it is unchanged, so a signal sent during the drain is never lost.
#[derive(Debug, Default)]
pub struct WakeChannel {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wake one waiting worker.
    pub fn signal(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_one();
    }

    /// Wake every waiting worker (shutdown).
    pub fn broadcast(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    /// Returns `true` when woken by a signal.
    pub fn wait(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        while *generation == seen {
            if self.cond.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }
}
