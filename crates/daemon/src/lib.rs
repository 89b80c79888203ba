#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The daemon crate wires every other crate in this workspace into a
//! running Single Packet Authorization server: [`engine::AuthorizationEngine`]
//! is the Authorization Engine component, [`control::ControlPlane`] is the
//! Control Plane component. Neither crate knows about the other's existence
//! except through this one.
//!
//! # Design
//!
//! [`engine::AuthorizationEngine`] is generic over [`replay::ReplayStore`]
//! so either back-end can be selected at startup from
//! [`config::ReplayBackendKind`]. [`control::ControlPlane`] is additionally
//! generic over [`capture::FrameSource`], so a production build wires in a
//! real capture handle while tests and `-C`-bounded runs use
//! [`capture::InMemoryFrameSource`]. Both generic parameters are resolved
//! once, at startup, by the binary crate — nothing here erases them behind
//! a trait object, since there is exactly one instance of each per process.
//!
//! # Invariants
//!
//! - [`engine::AuthorizationEngine::authorize`] never returns an error; see
//!   its own documentation for the fixed pipeline order.
//! - [`control::ControlPlane::run`] always attempts firewall teardown and
//!   pidfile release on the way out, even when the event loop itself
//!   returned an error.
//!
//! # Errors
//!
//! [`DaemonError`] wraps every crate-boundary error via `#[from]`, for the
//! startup path only (config load, policy load, pidfile acquisition,
//! signal registration, firewall chain initialization). The running event
//! loop never returns an error out of a single packet's handling — see
//! [`engine`]'s module documentation for the silent-boundary policy.

/// The control plane: pidfile, signals, the expiry tick, the main loop,
/// and the admin verbs that don't require a running daemon.
pub mod control;
/// The authorization engine: the fixed decode → replay → policy pipeline.
pub mod engine;

pub use control::{fw_list, kill, rotate_digest_cache, status, ControlPlane, DaemonStatus};
pub use engine::{AuthorizationEngine, EngineConfig};

/// A startup-path failure. Never returned by the packet-handling hot path;
/// see the crate-level documentation's Errors section.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// The access policy file failed to load or parse.
    #[error(transparent)]
    Access(#[from] access::AccessFileError),
    /// The replay cache failed to load, read, or write.
    #[error(transparent)]
    Replay(#[from] replay::ReplayError),
    /// A firewall-driver operation failed.
    #[error(transparent)]
    Firewall(#[from] firewall::FirewallError),
    /// Pidfile acquisition or release failed.
    #[error(transparent)]
    PidFile(#[from] platform::PidFileError),
    /// Signal handler registration failed.
    #[error(transparent)]
    Signals(#[from] platform::SignalsError),
    /// A raw signal could not be delivered to another process (`kill`
    /// admin verb).
    #[error("{0}")]
    Signal(String),
}
