//! Hosts known to the link and their per-host ACLK state.
//!
//! Each host guards its metadata push state and popcorn (debounce) state
//! behind its own lock, so gating one host never serialises another. The
//! lock is only held to read or flip state, never across a publish.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Gates one on-connect metadata push per connection epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataState {
    Required,
    Queued,
    Sent,
}

/// Whether the host's chart set has settled after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopcornState {
    Initializing,
    Stable,
}

#[derive(Debug, Clone)]
pub struct HostAclkState {
    pub metadata: MetadataState,
    pub popcorn: PopcornState,
    /// Last time a collector interrupted popcorning; `None` once stable.
    pub last_popcorn_update: Option<Instant>,
}

impl HostAclkState {
    fn popcorning(&self) -> bool {
        self.popcorn == PopcornState::Initializing && self.last_popcorn_update.is_some()
    }
}

#[derive(Debug)]
pub struct Host {
    hostname: String,
    machine_guid: String,
    aclk: Mutex<HostAclkState>,
}

impl Host {
    /// A freshly seen host: popcorning from now, metadata still required.
    pub fn new(hostname: impl Into<String>, machine_guid: impl Into<String>) -> Arc<Self> {
        Self::with_state(
            hostname,
            machine_guid,
            HostAclkState {
                metadata: MetadataState::Required,
                popcorn: PopcornState::Initializing,
                last_popcorn_update: Some(Instant::now()),
            },
        )
    }

    pub fn with_state(
        hostname: impl Into<String>,
        machine_guid: impl Into<String>,
        state: HostAclkState,
    ) -> Arc<Self> {
        Arc::new(Self {
            hostname: hostname.into(),
            machine_guid: machine_guid.into(),
            aclk: Mutex::new(state),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn machine_guid(&self) -> &str {
        &self.machine_guid
    }

    pub fn aclk_state(&self) -> MutexGuard<'_, HostAclkState> {
        self.aclk.lock()
    }

    pub fn metadata_state(&self) -> MetadataState {
        self.aclk.lock().metadata
    }

    pub fn set_metadata_state(&self, state: MetadataState) {
        self.aclk.lock().metadata = state;
    }

    /// Move `from` to `to` only if the state is still `from`.
    pub fn transition_metadata(&self, from: MetadataState, to: MetadataState) -> bool {
        let mut aclk = self.aclk.lock();
        if aclk.metadata != from {
            return false;
        }
        aclk.metadata = to;
        true
    }

    /// Mark metadata as sent and return what it was before.
    pub fn take_metadata_for_send(&self) -> MetadataState {
        let mut aclk = self.aclk.lock();
        std::mem::replace(&mut aclk.metadata, MetadataState::Sent)
    }

    /// New collector activity: restart the quiet period.
    pub fn interrupt_popcorning_at(&self, now: Instant) {
        let mut aclk = self.aclk.lock();
        aclk.popcorn = PopcornState::Initializing;
        aclk.last_popcorn_update = Some(now);
    }

    pub fn is_popcorning(&self) -> bool {
        self.aclk.lock().popcorning()
    }

    /// Check and update the popcorning state, returning the current one.
    pub fn popcorn_check_at(&self, now: Instant, stable_timeout: Duration) -> PopcornState {
        let mut aclk = self.aclk.lock();
        if aclk.popcorn != PopcornState::Initializing {
            return aclk.popcorn;
        }
        let Some(last) = aclk.last_popcorn_update else {
            return aclk.popcorn;
        };

        let quiet = now.saturating_duration_since(last);
        if quiet >= stable_timeout {
            aclk.popcorn = PopcornState::Stable;
            aclk.last_popcorn_update = None;
            drop(aclk);
            info!(
                "Host \"{}\" stable, ACLK popcorning finished. Last interrupt was {} seconds ago",
                self.hostname,
                quiet.as_secs()
            );
            return PopcornState::Stable;
        }
        aclk.popcorn
    }
}

/// The primary host and its children, plus which child popcorns next.
#[derive(Debug)]
pub struct HostRegistry {
    localhost: Arc<Host>,
    children: RwLock<Vec<Arc<Host>>>,
    next_popcorn_host: Mutex<Option<Arc<Host>>>,
}

impl HostRegistry {
    pub fn new(localhost: Arc<Host>) -> Self {
        Self {
            localhost,
            children: RwLock::new(Vec::new()),
            next_popcorn_host: Mutex::new(None),
        }
    }

    pub fn localhost(&self) -> &Arc<Host> {
        &self.localhost
    }

    pub fn is_localhost(&self, host: &Arc<Host>) -> bool {
        Arc::ptr_eq(&self.localhost, host)
    }

    pub fn children(&self) -> Vec<Arc<Host>> {
        self.children.read().clone()
    }

    pub fn find(&self, machine_guid: &str) -> Option<Arc<Host>> {
        if self.localhost.machine_guid() == machine_guid {
            return Some(self.localhost.clone());
        }
        self.children
            .read()
            .iter()
            .find(|h| h.machine_guid() == machine_guid)
            .cloned()
    }

    pub fn add_child(&self, host: Arc<Host>) {
        self.children.write().push(host);
        self.update_next_child_to_popcorn();
    }

    pub fn remove_child(&self, machine_guid: &str) -> Option<Arc<Host>> {
        let removed = {
            let mut children = self.children.write();
            let pos = children.iter().position(|h| h.machine_guid() == machine_guid)?;
            children.remove(pos)
        };
        self.update_next_child_to_popcorn();
        Some(removed)
    }

    pub fn next_popcorn_host(&self) -> Option<Arc<Host>> {
        self.next_popcorn_host.lock().clone()
    }

    /// Pick the popcorning child whose last interrupt is oldest.
    pub fn update_next_child_to_popcorn(&self) {
        let children = self.children.read();
        let next = children
            .iter()
            .filter_map(|host| {
                let aclk = host.aclk_state();
                aclk.popcorning().then(|| (aclk.last_popcorn_update, host))
            })
            .min_by_key(|(last, _)| *last)
            .map(|(_, host)| host.clone());
        *self.next_popcorn_host.lock() = next;
    }

    /// Clear `host` as the next popcorn candidate and choose the following one.
    /// Returns `false` if `host` was no longer the candidate.
    pub fn advance_popcorn(&self, host: &Arc<Host>) -> bool {
        let claimed = {
            let mut next = self.next_popcorn_host.lock();
            let current = next.as_ref().is_some_and(|h| Arc::ptr_eq(h, host));
            if current {
                *next = None;
            }
            current
        };
        self.update_next_child_to_popcorn();
        claimed
    }
}
