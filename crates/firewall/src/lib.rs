#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The packet-filter driver: owns the daemon-side half of the filter
//! chain topology (an exclusively-owned chain receiving grant rules, and a
//! jump into it from a shared host chain), installs grant rules with a
//! durable `_exp_<unix_seconds>` comment, and periodically reaps expired
//! ones.
//!
//! # Design
//!
//! Three layers, bottom to top:
//!
//! - [`runner`] — subprocess execution. Every external command is an argv
//!   vector run through [`runner::SubprocessRunner`], never a shell
//!   string.
//! - [`backend`] — [`backend::FwBackend`] turns chain-topology and grant
//!   operations into concrete argv vectors for one packet filter; this
//!   crate ships [`backend::IptablesBackend`].
//! - [`chain`] and [`driver`] — [`chain::ChainBinding`] is the static
//!   per-chain configuration; [`driver::FirewallDriver`] is the stateful
//!   orchestrator holding bindings, a backend, and per-chain
//!   [`chain::PerChainCounter`] bookkeeping, and exposing the lifecycle
//!   operations the control plane calls: `init_chains`, `teardown_chains`,
//!   `install_grant`, `reap`, `list_rules`.
//!
//! # Invariants
//!
//! - The daemon never flushes or deletes a host chain (`from_chain`); only
//!   the jump rule it inserted there is ever removed, and only at
//!   shutdown.
//! - A rule found during a reap pass with no `_exp_` comment is treated as
//!   external interference, logged, and left untouched — it is never
//!   assumed to be a daemon rule whose comment was merely unparsable.
//!
//! # Errors
//!
//! [`backend::FirewallError`] covers command-execution failure (via
//! [`runner::RunnerError`]), non-zero exit, and listing-parse failure.
//! [`driver::FirewallDriver`] propagates these unchanged; callers decide
//! whether a given failure is fatal to the daemon or merely logged and
//! retried on the next tick.

pub mod backend;
pub mod chain;
pub mod driver;
pub mod runner;

pub use backend::{FirewallError, FwBackend, IptablesBackend};
pub use chain::{ChainBinding, Direction, GrantSpec, ListedRule, PerChainCounter};
pub use driver::{FirewallDriver, ReapReport};
pub use runner::{CommandOutput, ProcessRunner, RecordingRunner, RunnerError, SubprocessRunner};
