//! ACLK query statistics.
//!
//! Counters are only touched when statistics are enabled. The reporting
//! side calls [`QueryStats::take_sample`] once per tick.

use parking_lot::Mutex;
use serde::Serialize;

/// Per-thread resource usage samples allowed per worker and tick.
pub const MAX_GETRUSAGE_CALLS_PER_TICK: u32 = 5;

/// Min/avg/max accumulator, microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStat {
    pub count: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl LatencyStat {
    pub fn update(&mut self, value_us: u64) {
        if self.count == 0 || value_us < self.min_us {
            self.min_us = value_us;
        }
        self.max_us = self.max_us.max(value_us);
        self.total_us = self.total_us.saturating_add(value_us);
        self.count += 1;
    }

    pub fn avg_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_us / self.count
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThreadCpu {
    pub user_us: u64,
    pub system_us: u64,
}

/// Snapshot of one reporting tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSample {
    pub queries_queued: u64,
    pub queries_dispatched: u64,
    pub queries_per_thread: Vec<u64>,
    pub cloud_q_recvd_to_processed: LatencyStat,
    pub cloud_q_db_query_time: LatencyStat,
    pub thread_cpu: Vec<Option<ThreadCpu>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    sample: StatsSample,
    getrusage_calls: Vec<u32>,
}

#[derive(Debug)]
pub struct QueryStats {
    enabled: bool,
    inner: Mutex<StatsInner>,
}

impl QueryStats {
    pub fn new(enabled: bool, threads: usize) -> Self {
        let mut inner = StatsInner::default();
        inner.sample.queries_per_thread = vec![0; threads];
        inner.sample.thread_cpu = vec![None; threads];
        inner.getrusage_calls = vec![0; threads];
        Self {
            enabled,
            inner: Mutex::new(inner),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn query_queued(&self) {
        if self.enabled {
            self.inner.lock().sample.queries_queued += 1;
        }
    }

    pub fn query_dispatched(&self, idx: usize) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        inner.sample.queries_dispatched += 1;
        let per_thread = &mut inner.sample.queries_per_thread;
        if per_thread.len() <= idx {
            per_thread.resize(idx + 1, 0);
        }
        per_thread[idx] += 1;
    }

    pub fn cloud_query_received_to_processed(&self, elapsed_us: u64) {
        if self.enabled {
            self.inner.lock().sample.cloud_q_recvd_to_processed.update(elapsed_us);
        }
    }

    pub fn cloud_query_db_time(&self, elapsed_us: u64) {
        if self.enabled {
            self.inner.lock().sample.cloud_q_db_query_time.update(elapsed_us);
        }
    }

    /// Sample CPU usage of the calling worker thread, within the per-tick budget.
    pub fn sample_thread_usage(&self, idx: usize) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.getrusage_calls.len() <= idx {
            inner.getrusage_calls.resize(idx + 1, 0);
            inner.sample.thread_cpu.resize(idx + 1, None);
        }
        if inner.getrusage_calls[idx] >= MAX_GETRUSAGE_CALLS_PER_TICK {
            return;
        }
        inner.getrusage_calls[idx] += 1;
        inner.sample.thread_cpu[idx] = current_thread_cpu();
    }

    /// Return the current tick's sample and start a new one.
    pub fn take_sample(&self) -> StatsSample {
        let mut inner = self.inner.lock();
        let threads = inner.sample.queries_per_thread.len();
        let fresh = StatsSample {
            queries_per_thread: vec![0; threads],
            thread_cpu: vec![None; inner.sample.thread_cpu.len()],
            ..StatsSample::default()
        };
        inner.getrusage_calls.iter_mut().for_each(|calls| *calls = 0);
        std::mem::replace(&mut inner.sample, fresh)
    }
}

#[cfg(target_os = "linux")]
fn current_thread_cpu() -> Option<ThreadCpu> {
    use nix::sys::resource::{getrusage, UsageWho};

    let usage = getrusage(UsageWho::RUSAGE_THREAD).ok()?;
    let (user, system) = (usage.user_time(), usage.system_time());
    Some(ThreadCpu {
        user_us: (user.tv_sec() as u64) * 1_000_000 + user.tv_usec() as u64,
        system_us: (system.tv_sec() as u64) * 1_000_000 + system.tv_usec() as u64,
    })
}

#[cfg(not(target_os = "linux"))]
fn current_thread_cpu() -> Option<ThreadCpu> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_stats_stay_empty() {
        let stats = QueryStats::new(false, 2);
        stats.query_queued();
        stats.query_dispatched(1);
        let sample = stats.take_sample();
        assert_eq!(sample.queries_queued, 0);
        assert_eq!(sample.queries_per_thread, vec![0, 0]);
    }

    #[test]
    fn test_counters_reset_per_tick() {
        let stats = QueryStats::new(true, 2);
        stats.query_queued();
        stats.query_queued();
        stats.query_dispatched(1);
        stats.query_dispatched(3);

        let sample = stats.take_sample();
        assert_eq!(sample.queries_queued, 2);
        assert_eq!(sample.queries_dispatched, 2);
        assert_eq!(sample.queries_per_thread, vec![0, 1, 0, 1]);

        let next = stats.take_sample();
        assert_eq!(next.queries_queued, 0);
        assert_eq!(next.queries_per_thread, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_latency_min_avg_max() {
        let mut stat = LatencyStat::default();
        for v in [30, 10, 20] {
            stat.update(v);
        }
        assert_eq!(stat.min_us, 10);
        assert_eq!(stat.max_us, 30);
        assert_eq!(stat.avg_us(), 20);
    }

    #[test]
    fn test_thread_usage_budget() {
        let stats = QueryStats::new(true, 1);
        for _ in 0..(MAX_GETRUSAGE_CALLS_PER_TICK + 3) {
            stats.sample_thread_usage(0);
        }
        assert_eq!(stats.inner.lock().getrusage_calls[0], MAX_GETRUSAGE_CALLS_PER_TICK);
        stats.take_sample();
        assert_eq!(stats.inner.lock().getrusage_calls[0], 0);
    }
}
