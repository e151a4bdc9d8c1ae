//! ACLK query worker pool.
//!
//! Every worker first waits for the primary host to stop popcorning, then
//! loops: settle the protocol version, queue pending metadata pushes, drain
//! the shared queue, and sleep on the wake channel until more work arrives.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::QueryConfig;
use crate::error::{AclkError, Result};
use crate::executor::{Collaborators, QueryExecutor};
use crate::host::{Host, HostRegistry, MetadataState, PopcornState};
use crate::negotiation::{Negotiation, NegotiationCheck};
use crate::queue::{EnqueueOutcome, Pop, QueryQueue};
use crate::record::{QueryRecord, QueryRequest};
use crate::stats::QueryStats;
use crate::wake::WakeChannel;

const IDLE: Duration = Duration::from_secs(1);

/// What one steady-state iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Disabled,
    Negotiating,
    /// Number of records dispatched.
    Drained(usize),
}

struct Shared {
    config: QueryConfig,
    queue: QueryQueue,
    wake: Arc<WakeChannel>,
    hosts: Arc<HostRegistry>,
    negotiation: Arc<Negotiation>,
    stats: Arc<QueryStats>,
    executor: QueryExecutor,
    disabled: AtomicBool,
    shutdown: AtomicBool,
}

/// Owns the query queue and the threads draining it.
pub struct AclkQuery {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AclkQuery {
    pub fn new(config: QueryConfig, hosts: Arc<HostRegistry>, collaborators: Collaborators) -> Self {
        let wake = Arc::new(WakeChannel::new());
        let stats = Arc::new(QueryStats::new(config.stats_enabled, config.query_threads));
        let negotiation = Arc::new(Negotiation::new(
            config.min_version,
            config.max_version,
            config.negotiation_timeout(),
        ));
        let executor = QueryExecutor::new(collaborators, hosts.clone(), negotiation.clone(), stats.clone());

        Self {
            shared: Arc::new(Shared {
                queue: QueryQueue::new(wake.clone(), stats.clone()),
                config,
                wake,
                hosts,
                negotiation,
                stats,
                executor,
                disabled: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `workers` query threads named `ACLK_QUERY_<n>`.
    pub fn start(&self, workers: usize) -> Result<()> {
        let mut handles = self.workers.lock();
        let first = handles.len();
        for idx in first..first + workers {
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("ACLK_QUERY_{}", idx))
                .spawn(move || shared.run(idx))
                .map_err(AclkError::Spawn)?;
            handles.push(handle);
        }
        info!("Started {} ACLK query threads", workers);
        Ok(())
    }

    /// Stop and join every worker, then free whatever is still queued.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.broadcast();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let joined = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                error!("ACLK query thread panicked");
            }
        }

        self.shared.queue.set_connected(false);
        self.shared.queue.drain_and_free_all();
        if joined > 0 {
            info!("Stopped {} ACLK query threads", joined);
        }
    }

    pub fn enqueue(&self, request: QueryRequest) -> EnqueueOutcome {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return EnqueueOutcome::NotConnected;
        }
        self.shared.queue.enqueue(request)
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn queue(&self) -> &QueryQueue {
        &self.shared.queue
    }

    /// Current popcorn state of `host`, promoting it to stable when quiet long enough.
    pub fn check_popcorn_state(&self, host: &Host) -> PopcornState {
        self.shared.check_popcorn_state(host)
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.queue.set_connected(connected);
        if connected {
            self.shared.wake.broadcast();
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.shared.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Apply the version the cloud offered. Ignored once a version is set.
    pub fn set_negotiated_version(&self, offered: u32) -> Option<u32> {
        let version = self.shared.negotiation.set_from_peer(offered)?;
        info!("ACLK protocol version negotiated to {}", version);
        self.shared.executor.transport().configure_rx(version);
        Some(version)
    }

    pub fn negotiation(&self) -> &Arc<Negotiation> {
        &self.shared.negotiation
    }

    pub fn hosts(&self) -> &Arc<HostRegistry> {
        &self.shared.hosts
    }

    pub fn stats(&self) -> &Arc<QueryStats> {
        &self.shared.stats
    }

    /// One steady-state iteration on behalf of worker `idx`, without waiting.
    pub fn run_once(&self, idx: usize) -> Tick {
        self.shared.tick(idx, Instant::now())
    }
}

impl Drop for AclkQuery {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, returning early on a wake-up or shutdown.
    fn idle(&self, timeout: Duration) {
        let seen = self.wake.generation();
        if !self.is_shutdown() {
            self.wake.wait(seen, timeout);
        }
    }

    fn check_popcorn_state(&self, host: &Host) -> PopcornState {
        host.popcorn_check_at(Instant::now(), self.config.stable_timeout())
    }

    fn run(&self, idx: usize) {
        debug!("ACLK query thread {} started", idx);

        let localhost = self.hosts.localhost().clone();
        while !self.is_shutdown() && self.check_popcorn_state(&localhost) != PopcornState::Stable {
            self.idle(IDLE);
        }

        while !self.is_shutdown() {
            let seen = self.wake.generation();
            match self.tick(idx, Instant::now()) {
                Tick::Disabled | Tick::Negotiating => self.idle(IDLE),
                Tick::Drained(_) => {
                    if !self.is_shutdown() {
                        self.wake.wait(seen, IDLE);
                    }
                }
            }
        }

        debug!("ACLK query thread {} exiting", idx);
    }

    fn tick(&self, idx: usize, now: Instant) -> Tick {
        if self.disabled.load(Ordering::SeqCst) {
            return Tick::Disabled;
        }

        match self.negotiation.check_at(now) {
            NegotiationCheck::Negotiated(_) => {}
            NegotiationCheck::Waiting => {
                info!("Waiting for ACLK version negotiation message from cloud");
                return Tick::Negotiating;
            }
            NegotiationCheck::FellBack(version) => {
                error!(
                    "ACLK version negotiation failed. No reply to \"hello\" with \"version\" from cloud in time of {}s. Reverting to default ACLK version of {}.",
                    self.config.version_negotiation_timeout_secs, version
                );
                self.executor.transport().configure_rx(version);
            }
        }

        self.queue_localhost_metadata();
        self.queue_next_child_metadata(now);

        let mut dispatched = 0;
        while self.queue.is_connected() && !self.is_shutdown() {
            match self.queue.pop() {
                Pop::Ready(record) => {
                    self.process(record, idx);
                    dispatched += 1;
                }
                Pop::NotYet { .. } | Pop::Empty => break,
            }
        }
        Tick::Drained(dispatched)
    }

    fn queue_localhost_metadata(&self) {
        let localhost = self.hosts.localhost();
        // Only the worker that claims the push queues it
        if !localhost.transition_metadata(MetadataState::Required, MetadataState::Queued) {
            return;
        }

        if self.queue.enqueue(QueryRequest::on_connect(localhost.clone())) == EnqueueOutcome::NotConnected {
            error!("ACLK failed to queue on_connect command");
            localhost.transition_metadata(MetadataState::Queued, MetadataState::Required);
        }
    }

    fn queue_next_child_metadata(&self, now: Instant) {
        let Some(host) = self.hosts.next_popcorn_host() else {
            return;
        };
        if host.popcorn_check_at(now, self.config.stable_timeout()) != PopcornState::Stable {
            return;
        }
        if !self.hosts.advance_popcorn(&host) {
            return;
        }

        if self.queue.enqueue(QueryRequest::on_connect(host.clone())).is_accepted() {
            host.transition_metadata(MetadataState::Required, MetadataState::Queued);
        } else {
            warn!("ACLK failed to queue on_connect for child \"{}\"", host.hostname());
        }
    }

    fn process(&self, mut record: QueryRecord, idx: usize) {
        record.idx = Some(idx);
        debug!(
            "Thread {} ({}) processing {} query ({}) ({})",
            idx,
            thread::current().name().unwrap_or("-"),
            record.command(),
            record.topic(),
            record.query().unwrap_or_default()
        );

        if let Err(err) = self.executor.dispatch(&record) {
            error!("ACLK {} query ({}) dropped: {}", record.command(), record.topic(), err);
        }

        self.stats.query_dispatched(idx);
        self.stats.sample_thread_usage(idx);
    }
}

