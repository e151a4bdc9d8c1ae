//! ACLK protocol version negotiation.
//!
//! The version is unset until the cloud answers our hello, or until the
//! negotiation deadline passes and we fall back to [`ACLK_VERSION_MIN`].
//! Once set it never changes.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub const ACLK_VERSION_MIN: u32 = 2;
pub const ACLK_VERSION_MAX: u32 = 3;

/// First version carrying binary (v2) cloud queries with compression.
pub const ACLK_V_COMPRESSION: u32 = 2;
/// First version allowing metadata pushes for child hosts.
pub const ACLK_V_CHILDRENSTATE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Unset,
    Negotiated(u32),
}

/// Result of [`Negotiation::check_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationCheck {
    Negotiated(u32),
    /// Still waiting for the cloud's reply.
    Waiting,
    /// The deadline passed just now; the caller must reconfigure for this version.
    FellBack(u32),
}

#[derive(Debug)]
struct NegotiationInner {
    version: Option<u32>,
    wait_till: Instant,
}

#[derive(Debug)]
pub struct Negotiation {
    inner: Mutex<NegotiationInner>,
    min: u32,
    max: u32,
    timeout: Duration,
}

impl Negotiation {
    pub fn new(min: u32, max: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(NegotiationInner {
                version: None,
                wait_till: Instant::now() + timeout,
            }),
            min,
            max,
            timeout,
        }
    }

    pub fn min_version(&self) -> u32 {
        self.min
    }

    pub fn state(&self) -> NegotiationState {
        match self.inner.lock().version {
            Some(version) => NegotiationState::Negotiated(version),
            None => NegotiationState::Unset,
        }
    }

    pub fn version(&self) -> Option<u32> {
        self.inner.lock().version
    }

    /// Version to stamp on outgoing messages.
    pub fn version_or_min(&self) -> u32 {
        self.version().unwrap_or(self.min)
    }

    /// Restart the fallback deadline, e.g. when a new hello is sent.
    pub fn rearm_at(&self, now: Instant) {
        self.inner.lock().wait_till = now + self.timeout;
    }

    /// Apply the version offered by the cloud, clamped to what we support.
    /// Returns `None` if a version was already agreed.
    pub fn set_from_peer(&self, offered: u32) -> Option<u32> {
        let mut inner = self.inner.lock();
        if inner.version.is_some() {
            return None;
        }
        let version = offered.clamp(self.min, self.max);
        inner.version = Some(version);
        Some(version)
    }

    pub fn check(&self) -> NegotiationCheck {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> NegotiationCheck {
        let mut inner = self.inner.lock();
        if let Some(version) = inner.version {
            return NegotiationCheck::Negotiated(version);
        }
        if inner.wait_till > now {
            return NegotiationCheck::Waiting;
        }
        inner.version = Some(self.min);
        NegotiationCheck::FellBack(self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiation() -> Negotiation {
        Negotiation::new(ACLK_VERSION_MIN, ACLK_VERSION_MAX, Duration::from_secs(5))
    }

    #[test]
    fn test_waits_until_deadline() {
        let neg = negotiation();
        assert_eq!(neg.check_at(Instant::now()), NegotiationCheck::Waiting);
        assert_eq!(neg.state(), NegotiationState::Unset);
    }

    #[test]
    fn test_fallback_happens_once() {
        let neg = negotiation();
        let later = Instant::now() + Duration::from_secs(6);
        assert_eq!(neg.check_at(later), NegotiationCheck::FellBack(ACLK_VERSION_MIN));
        assert_eq!(neg.check_at(later), NegotiationCheck::Negotiated(ACLK_VERSION_MIN));
        assert_eq!(neg.check_at(later + Duration::from_secs(60)), NegotiationCheck::Negotiated(ACLK_VERSION_MIN));
        assert_eq!(neg.set_from_peer(3), None);
        assert_eq!(neg.version(), Some(ACLK_VERSION_MIN));
    }

    #[test]
    fn test_peer_version_is_clamped_and_final() {
        let neg = negotiation();
        assert_eq!(neg.set_from_peer(9), Some(ACLK_VERSION_MAX));
        assert_eq!(neg.set_from_peer(2), None);
        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(neg.check_at(later), NegotiationCheck::Negotiated(ACLK_VERSION_MAX));
    }

    #[test]
    fn test_rearm_moves_deadline() {
        let neg = negotiation();
        let later = Instant::now() + Duration::from_secs(4);
        neg.rearm_at(later);
        assert_eq!(neg.check_at(later + Duration::from_secs(3)), NegotiationCheck::Waiting);
    }
}
