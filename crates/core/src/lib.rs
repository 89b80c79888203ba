#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `spa_core` exposes the data model shared by every crate in the
//! single-packet-authorization daemon: the candidate a capture adaptor hands
//! to the authorization engine, the plaintext record a codec decodes, the
//! digest a replay cache keys on, the grant a firewall driver installs, and
//! the source-pattern matching used by the access policy.
//!
//! # Design
//!
//! None of these types perform I/O. They are plain data plus the small
//! amount of parsing/matching logic that every downstream crate would
//! otherwise have to duplicate (protocol-name parsing, CIDR/wildcard source
//! matching, digest hex rendering). Keeping them here means the codec,
//! replay, access, firewall, and daemon crates can all depend on one
//! definition of "what a request looks like" without depending on each
//! other.
//!
//! # Invariants
//!
//! - [`Digest`] never exceeds 64 bytes, matching the wire contract the SPA
//!   codec guarantees.
//! - [`SourcePattern::matches`] is a pure function of its pattern and the
//!   candidate address; it performs no I/O and cannot fail.
//! - [`Clock`] is the only source of "now" used by time-sensitive logic in
//!   this workspace, so tests can substitute [`FixedClock`] instead of
//!   racing the wall clock.
//!
//! # Errors
//!
//! Parsing functions in [`proto`] and [`pattern`] return crate-local error
//! enums deriving [`thiserror::Error`]; none of them panic on malformed
//! input.
//!
//! # Examples
//!
//! ```
//! use core::pattern::SourcePattern;
//! use std::net::IpAddr;
//!
//! let pattern: SourcePattern = "10.0.0.0/8".parse().unwrap();
//! let addr: IpAddr = "10.1.2.3".parse().unwrap();
//! assert!(pattern.matches(addr));
//! ```

/// Ephemeral packet candidates produced by the capture adaptor.
pub mod candidate;
/// Monotonic-friendly clock abstraction used by time-sensitive components.
pub mod clock;
/// Collision-resistant digest identifying a decoded SPA record.
pub mod digest;
/// The `{proto, port, src_ip, expiry}` tuple emitted by authorization.
pub mod grant;
/// Protocol and port-spec parsing shared by the access policy and firewall driver.
pub mod proto;
/// The plaintext record produced by the SPA decoder.
pub mod record;
/// Source-address pattern matching (CIDR / wildcard) used by access stanzas.
pub mod pattern;
/// Canonical program name and version string.
pub mod version;

pub use candidate::PacketCandidate;
pub use clock::{Clock, FixedClock, SystemClock};
pub use digest::Digest;
pub use grant::Grant;
pub use proto::{PortSpec, Protocol};
pub use record::{AccessRequest, PlaintextRecord};
pub use pattern::SourcePattern;
