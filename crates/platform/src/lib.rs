#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! Unix process mechanics the control plane needs and nothing else: the
//! pidfile as an exclusive-run token ([`pidfile`]) and signal delivery into
//! the single-threaded event loop ([`signals`]).
//!
//! # Design
//!
//! Everything in this crate touches the OS directly: pidfile locking goes
//! through `fs2`, process-liveness checks through `nix`'s safe wrapper over
//! `kill(2)`. No raw syscalls are made here, so the crate keeps
//! `#![deny(unsafe_code)]` like the rest of the workspace.
//!
//! # Invariants
//!
//! - A pidfile is only ever reclaimed after confirming the recorded PID is
//!   not a live process; see [`pidfile::PidFile::acquire`].
//! - Signal registration happens once per process; [`signals::Signals::new`]
//!   fails loudly rather than silently double-registering a handler.
//!
//! # Errors
//!
//! Every fallible operation returns a crate-local error implementing
//! [`std::error::Error`] via `thiserror`; nothing here panics on I/O
//! failure.

/// Exclusive-run pidfile acquisition, with stale-pidfile reclaim.
pub mod pidfile;
/// Signal registration for graceful shutdown and config reload.
pub mod signals;

pub use pidfile::{PidFile, PidFileError};
pub use signals::{Signal, Signals, SignalsError};
