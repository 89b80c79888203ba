//! Signal registration for the daemon's single-threaded event loop.
//!
//! The loop polls [`Signals::poll`] once per iteration rather than running a
//! dedicated signal-handling thread — matching the cooperative-scheduling
//! model the rest of the daemon uses (see `spa_daemon`).

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals as SignalHookIterator;

/// A signal the control plane reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful shutdown: stop capture, tear down chains, release the
    /// pidfile.
    Terminate,
    /// Config reload: re-read policy without re-initializing the firewall
    /// driver.
    Reload,
}

/// Error registering the process's signal handlers.
#[derive(Debug, thiserror::Error)]
#[error("failed to register signal handlers: {0}")]
pub struct SignalsError(#[from] std::io::Error);

/// A registered set of signal handlers, polled cooperatively.
pub struct Signals {
    inner: SignalHookIterator,
}

impl Signals {
    /// Registers handlers for `SIGTERM`, `SIGINT`, and `SIGHUP`.
    pub fn new() -> Result<Self, SignalsError> {
        let inner = SignalHookIterator::new([SIGTERM, SIGINT, SIGHUP])?;
        Ok(Self { inner })
    }

    /// Returns the next pending signal without blocking, or `None` if no
    /// signal has arrived since the last poll.
    pub fn poll(&mut self) -> Option<Signal> {
        self.inner.pending().find_map(|raw| match raw {
            SIGTERM | SIGINT => Some(Signal::Terminate),
            SIGHUP => Some(Signal::Reload),
            _ => None,
        })
    }
}
