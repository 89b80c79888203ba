#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The configuration loader: a line-oriented `KEY VALUE` parser
//! ([`main_config::RawConfig`]) with `$VAR` expansion, override-fragment
//! layering, and CLI-flag merge, collapsing into one
//! [`resolved::ResolvedConfig`] — the structure `dump-config` prints and
//! every other component is constructed from.
//!
//! # Design
//!
//! Resolution happens in three strict layers: the main config file is
//! parsed first; named override fragments (`-O`, repeatable or
//! comma-separated — see `DESIGN.md`) are applied next, strictly in the
//! order given, last write wins; CLI flag overrides are applied last and
//! always win over any file-sourced value. A second `-c` is rejected
//! outright rather than silently accepted, since layering it ambiguously
//! with `-O` has no well-defined order.
//!
//! Chain-topology configuration (`FW_CHAIN_<kind>` directives) is parsed
//! by [`chain::parse_chain_bindings`] directly into [`firewall::ChainBinding`]
//! values, in the order the directives were defined; that order becomes
//! the firewall driver's binding iteration order.
//!
//! # Invariants
//!
//! - Unknown config keys never fail parsing; they are accepted but
//!   unused.
//! - `$NAME` expansion only ever looks backward at already-parsed keys
//!   within the same merged view — forward references are left literal.
//! - [`resolved::ResolvedConfig::resolve`] fails loudly (never a silent
//!   default) when a required field (`ACCESS_FILE`, `FW_BIN`, at least one
//!   `FW_CHAIN_<kind>`) is absent from both files and CLI overrides.
//!
//! # Errors
//!
//! [`ConfigError`] covers file I/O, line-level parse failure, and
//! semantic validation failure (missing required field, malformed chain
//! binding) — all correspond to the fatal `CONFIG_INVALID` condition.

/// Chain-topology directive parsing.
pub mod chain;
/// The `KEY VALUE` file grammar and `$VAR` expansion.
pub mod main_config;
/// The fully merged configuration view.
pub mod resolved;

pub use main_config::RawConfig;
pub use resolved::{CliOverrides, ReplayBackendKind, ResolvedConfig};

/// Failure loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O failure reading a config or override-fragment file.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Semantic validation failure: a required field is missing, or a
    /// value could not be parsed into its expected type.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
