#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The durable replay-digest cache: a [`ReplayStore`] guarantees at-most-once
//! acceptance of any given SPA digest, across process restarts. Two
//! back-ends satisfy the same contract — [`file::FileStore`], a
//! human-readable append-only log, and [`indexed::IndexedStore`], an
//! in-process concurrent map standing in for an embedded key-value store.
//! The authorization engine is generic over [`ReplayStore`] and chooses a
//! back-end once at startup.
//!
//! # Design
//!
//! `check_and_record` is the entire contract: it either persists a new
//! digest and returns [`Verdict::Fresh`], or recognises a previously-seen
//! digest and returns [`Verdict::Replay`] carrying the original sighting's
//! context for the WARN-level log the authorization engine emits. Replay
//! bookkeeping (last-seen time, hit count) may update in place, but that
//! update must never change which verdict is returned — a digest reported
//! `Fresh` once must never be reported `Fresh` again for the lifetime of
//! the store.
//!
//! # Invariants
//!
//! - No digest is ever reported [`Verdict::Fresh`] twice (see
//!   [`file::FileStore`] and [`indexed::IndexedStore`] for the
//!   back-end-specific crash-consistency argument).
//! - A corrupted or unreadable cache file fails store construction loudly;
//!   it never silently falls back to an empty cache.
//! - Malformed lines encountered while loading a file-backed store are
//!   skipped, not treated as fatal, but are surfaced via
//!   `tracing::debug!` naming the line number (see the Open Questions
//!   resolution this module implements).
//!
//! # Errors
//!
//! [`ReplayError`] covers the I/O and parse failures a back-end can hit;
//! every fallible entry point returns it rather than panicking.

/// The append-only file back-end.
pub mod file;
/// The in-process concurrent-map back-end.
pub mod indexed;

use std::net::IpAddr;

use core::digest::Digest;
use core::proto::Protocol;

pub use file::FileStore;
pub use indexed::IndexedStore;

/// The network-observed context recorded alongside a digest, used for
/// replay-hit logging and the file cache's on-disk line format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    /// The transport protocol the candidate arrived over.
    pub proto: Protocol,
    /// The source IP the candidate was observed from.
    pub src_ip: IpAddr,
    /// The source port, if any.
    pub src_port: u16,
    /// The destination IP the candidate was addressed to.
    pub dst_ip: IpAddr,
    /// The destination port, if any.
    pub dst_port: u16,
}

/// A snapshot of a stored entry, returned on [`Verdict::Replay`] so callers
/// can log the original sighting without holding a reference into the
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    /// The context recorded on first sighting.
    pub context: ReplayContext,
    /// Unix timestamp of first sighting.
    pub created: u64,
    /// Unix timestamp of the first replay, if any back-end tracks it.
    pub first_replay: Option<u64>,
    /// Unix timestamp of the most recent replay, if any back-end tracks it.
    pub last_replay: Option<u64>,
    /// Count of replay hits, if the back-end tracks it.
    pub replay_count: u64,
}

/// The result of [`ReplayStore::check_and_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The digest had never been seen; it is now durably recorded.
    Fresh,
    /// The digest was seen before; `entry` is the original sighting.
    Replay(ReplayEntry),
}

/// Error from a replay-store operation.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// I/O failure opening, reading, or appending to the cache file.
    #[error("replay cache I/O error at {path}: {source}")]
    Io {
        /// The cache file path involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The cache file exists but its content could not be parsed at all
    /// (as opposed to individual malformed lines, which are skipped).
    #[error("replay cache at {0} is unreadable")]
    Corrupt(String),
}

/// A durable set of SPA digests, guaranteeing at-most-once acceptance.
pub trait ReplayStore {
    /// Checks whether `digest` has been seen before; if not, persists it
    /// with `context` and `now` before returning `Ok(Verdict::Fresh)`.
    fn check_and_record(
        &mut self,
        digest: &Digest,
        context: ReplayContext,
        now: u64,
    ) -> Result<Verdict, ReplayError>;

    /// Number of distinct digests currently recorded.
    fn len(&self) -> usize;

    /// Whether the store currently holds no digests.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rotates the store: subsequent digests are tracked in a fresh,
    /// empty generation. Back-ends with a durable file rename it; purely
    /// in-memory back-ends simply clear.
    fn rotate(&mut self) -> Result<(), ReplayError>;
}
