//! Time source abstraction.
//!
//! Timestamp-window validation, replay-cache rotation, and firewall-rule
//! expiry all need "what time is it" without caring where that answer comes
//! from. Production code uses [`SystemClock`]; tests substitute
//! [`FixedClock`] so a timestamp-skew or expiry test never races the wall
//! clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current Unix timestamp, in seconds.
pub trait Clock: Send + Sync {
    /// Returns the current time as seconds since the Unix epoch.
    fn now_unix(&self) -> u64;
}

/// A [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A [`Clock`] that always returns a fixed timestamp, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.0
    }
}
