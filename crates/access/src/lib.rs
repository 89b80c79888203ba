#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The access-policy stanza store: a `SOURCE`-keyed, order-significant
//! sequence of [`AccessStanza`] records parsed from the access file, plus
//! first-match source lookup ([`AccessPolicy::match_source`]) and
//! post-decode re-validation ([`AccessStanza::validate`]).
//!
//! # Design
//!
//! Parses the access-file grammar: `SOURCE
//! <pattern>` begins a stanza, subsequent `KEY VALUE` lines belong to it
//! until the next `SOURCE` or EOF. Parsing is a small explicit state
//! machine over lines, not an in-place buffer scan, to keep stanza
//! boundaries and validation errors easy to reason about.
//!
//! # Invariants
//!
//! - [`AccessPolicy::match_source`] scans stanzas in file order and returns
//!   the first match; stanza order is preserved exactly as parsed.
//! - [`AccessStanza::validate`] never widens the requested access list: its
//!   `Ok` result is always a subset of what the record asked for,
//!   intersected against the stanza's permit list with deny taking
//!   priority.
//!
//! # Errors
//!
//! [`AccessFileError`] covers file parsing; [`PolicyError`] covers
//! post-decode validation, matching `POLICY_NO_MATCH`, `POLICY_DENY`.
//! `POLICY_TIMESTAMP` is raised by the codec's skew check rather than
//! duplicated here — see `DESIGN.md`.

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use codec::CandidateKey;
use core::pattern::SourcePattern;
use core::proto::{PortSpec, parse_port_list};
use core::record::PlaintextRecord;

/// A single `SOURCE`-keyed stanza from the access file.
#[derive(Debug, Clone)]
pub struct AccessStanza {
    /// The source pattern this stanza was declared under.
    pub source: SourcePattern,
    /// Symmetric keys to try, in declaration order. The decoder tries each
    /// in turn, labeling WARN-level HMAC-failure logs with the source
    /// pattern's display form.
    pub keys: Vec<CandidateKey>,
    /// The `{proto, port}` entries this stanza permits.
    pub open_ports: Vec<PortSpec>,
    /// The `{proto, port}` entries this stanza explicitly denies; deny wins
    /// over permit for any entry present in both lists.
    pub restrict_ports: Vec<PortSpec>,
    /// Maximum access timeout this stanza will grant, in seconds.
    pub max_fw_timeout: Option<u32>,
    /// Required declared username, if any.
    pub require_username: Option<String>,
    /// A GPG signer-ID constraint. Stored but not cryptographically
    /// enforced, since GPG verification itself is out of scope for this
    /// daemon.
    pub gpg_remote_id: Option<String>,
}

impl AccessStanza {
    fn new(source: SourcePattern) -> Self {
        Self {
            source,
            keys: Vec::new(),
            open_ports: Vec::new(),
            restrict_ports: Vec::new(),
            max_fw_timeout: None,
            require_username: None,
            gpg_remote_id: None,
        }
    }

    /// Re-validates a decoded record against this stanza, after the replay
    /// check has already passed.
    ///
    /// Returns the permit-intersected `{proto, port}` list actually to be
    /// granted (a subset of `record.access_list`), with the requested
    /// timeout clamped to `min(requested, stanza.max_fw_timeout)`. Returns
    /// [`PolicyError::Deny`] if the username does not match or nothing
    /// requested survives the permit/deny intersection.
    pub fn validate(&self, record: &PlaintextRecord) -> Result<Vec<PortSpec>, PolicyError> {
        if let Some(required) = &self.require_username {
            if record.username.as_deref() != Some(required.as_str()) {
                return Err(PolicyError::Deny(format!(
                    "required username `{required}` not presented"
                )));
            }
        }

        let granted: Vec<PortSpec> = record
            .access_list
            .iter()
            .copied()
            .filter(|spec| !self.restrict_ports.contains(spec))
            .filter(|spec| self.open_ports.contains(spec))
            .collect();

        if granted.is_empty() {
            return Err(PolicyError::Deny(
                "no requested proto/port survived the permit/deny intersection".to_string(),
            ));
        }

        Ok(granted)
    }

    /// Clamps a requested timeout to this stanza's configured maximum.
    #[must_use]
    pub fn clamp_timeout(&self, requested: Option<u32>, default_timeout: u32) -> u32 {
        let wanted = requested.unwrap_or(default_timeout);
        match self.max_fw_timeout {
            Some(max) => wanted.min(max),
            None => wanted,
        }
    }
}

/// Failure re-validating a decoded record against its matched stanza.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    /// No stanza's source pattern matched the observed source address.
    #[error("no access stanza matched the source address")]
    NoMatch,
    /// A stanza matched but re-validation rejected the request.
    #[error("access denied: {0}")]
    Deny(String),
}

/// An ordered, first-match-wins collection of [`AccessStanza`] records.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    stanzas: Vec<AccessStanza>,
}

impl AccessPolicy {
    /// Loads and parses an access file from disk.
    pub fn load(path: &Path) -> Result<Self, AccessFileError> {
        let text = fs::read_to_string(path).map_err(|source| AccessFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses access-file text directly (used by tests and `-O` fragment
    /// layering, should the access file ever be split that way).
    pub fn parse(text: &str) -> Result<Self, AccessFileError> {
        let mut stanzas: Vec<AccessStanza> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, v.trim()))
                .unwrap_or((line, ""));

            if key.eq_ignore_ascii_case("SOURCE") {
                let pattern = SourcePattern::from_str(value)
                    .map_err(|_| AccessFileError::Parse { line: line_no, message: format!("invalid SOURCE pattern `{value}`") })?;
                stanzas.push(AccessStanza::new(pattern));
                continue;
            }

            let Some(stanza) = stanzas.last_mut() else {
                return Err(AccessFileError::Parse {
                    line: line_no,
                    message: format!("key `{key}` appears before any SOURCE stanza"),
                });
            };

            apply_key(stanza, key, value, line_no)?;
        }

        Ok(Self { stanzas })
    }

    /// Returns the first stanza whose source pattern matches `addr`, in
    /// file order.
    #[must_use]
    pub fn match_source(&self, addr: IpAddr) -> Option<&AccessStanza> {
        self.stanzas.iter().find(|stanza| stanza.source.matches(addr))
    }

    /// Returns all configured stanzas, in file order, for diagnostic
    /// tooling (`dump-config`).
    #[must_use]
    pub fn stanzas(&self) -> &[AccessStanza] {
        &self.stanzas
    }
}

fn apply_key(
    stanza: &mut AccessStanza,
    key: &str,
    value: &str,
    line_no: usize,
) -> Result<(), AccessFileError> {
    let err = |message: String| AccessFileError::Parse { line: line_no, message };

    match key.to_ascii_uppercase().as_str() {
        "KEY" => stanza.keys.push(CandidateKey::new(
            stanza.source.to_string(),
            value.as_bytes().to_vec(),
        )),
        "KEY_BASE64" => {
            let decoded = BASE64
                .decode(value)
                .map_err(|_| err(format!("invalid base64 in KEY_BASE64 `{value}`")))?;
            stanza
                .keys
                .push(CandidateKey::new(stanza.source.to_string(), decoded));
        }
        "OPEN_PORTS" => {
            stanza.open_ports = parse_port_list(value)
                .map_err(|e| err(format!("invalid OPEN_PORTS: {e}")))?;
        }
        "RESTRICT_PORTS" => {
            stanza.restrict_ports = parse_port_list(value)
                .map_err(|e| err(format!("invalid RESTRICT_PORTS: {e}")))?;
        }
        "MAX_FW_TIMEOUT" => {
            stanza.max_fw_timeout = Some(
                value
                    .parse()
                    .map_err(|_| err(format!("invalid MAX_FW_TIMEOUT `{value}`")))?,
            );
        }
        "REQUIRE_USERNAME" => stanza.require_username = Some(value.to_string()),
        "GPG_REMOTE_ID" | "GPG_DECRYPT_ID" => stanza.gpg_remote_id = Some(value.to_string()),
        other => {
            tracing::warn!(line = line_no, key = other, "unrecognised access file key, ignoring");
        }
    }
    Ok(())
}

/// Failure loading or parsing the access file.
#[derive(Debug, thiserror::Error)]
pub enum AccessFileError {
    /// I/O failure reading the file.
    #[error("failed to read access file {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A line failed to parse.
    #[error("access file line {line}: {message}")]
    Parse {
        /// 1-indexed line number.
        line: usize,
        /// Human-readable description of the parse failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::proto::Protocol;

    const SAMPLE: &str = "\
# comment
SOURCE 10.0.0.0/8
KEY supersecret
OPEN_PORTS tcp/22,udp/53
MAX_FW_TIMEOUT 30

SOURCE ANY
KEY_BASE64 c2VjcmV0
RESTRICT_PORTS tcp/23
OPEN_PORTS tcp/80
REQUIRE_USERNAME alice
";

    #[test]
    fn parses_multiple_stanzas_in_order() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        assert_eq!(policy.stanzas().len(), 2);
        assert_eq!(policy.stanzas()[0].source.to_string(), "10.0.0.0/8");
        assert_eq!(policy.stanzas()[1].source.to_string(), "ANY");
    }

    #[test]
    fn match_source_returns_first_match_in_file_order() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let matched = policy.match_source("10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(matched.source.to_string(), "10.0.0.0/8");

        let fallback = policy.match_source("198.51.100.1".parse().unwrap()).unwrap();
        assert_eq!(fallback.source.to_string(), "ANY");
    }

    #[test]
    fn key_base64_decodes_into_raw_bytes() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let stanza = &policy.stanzas()[1];
        assert_eq!(stanza.keys[0].key, b"secret".to_vec());
    }

    #[test]
    fn rejects_key_line_before_any_source() {
        let err = AccessPolicy::parse("KEY oops\n").unwrap_err();
        assert!(matches!(err, AccessFileError::Parse { line: 1, .. }));
    }

    #[test]
    fn validate_intersects_requested_with_permit_list() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let stanza = &policy.stanzas()[0];
        let record = PlaintextRecord::new(
            vec![PortSpec::new(Protocol::Tcp, 22), PortSpec::new(Protocol::Tcp, 9999)],
            0,
        );
        let granted = stanza.validate(&record).unwrap();
        assert_eq!(granted, vec![PortSpec::new(Protocol::Tcp, 22)]);
    }

    #[test]
    fn validate_denies_when_deny_list_wins() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let stanza = &policy.stanzas()[1];
        let mut record = PlaintextRecord::new(vec![PortSpec::new(Protocol::Tcp, 23)], 0);
        record.username = Some("alice".to_string());
        assert!(matches!(stanza.validate(&record), Err(PolicyError::Deny(_))));
    }

    #[test]
    fn validate_denies_username_mismatch() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let stanza = &policy.stanzas()[1];
        let mut record = PlaintextRecord::new(vec![PortSpec::new(Protocol::Tcp, 80)], 0);
        record.username = Some("mallory".to_string());
        assert!(matches!(stanza.validate(&record), Err(PolicyError::Deny(_))));
    }

    #[test]
    fn clamp_timeout_caps_at_stanza_maximum() {
        let policy = AccessPolicy::parse(SAMPLE).unwrap();
        let stanza = &policy.stanzas()[0];
        assert_eq!(stanza.clamp_timeout(Some(600), 30), 30);
        assert_eq!(stanza.clamp_timeout(Some(10), 30), 10);
        assert_eq!(stanza.clamp_timeout(None, 30), 30);
    }
}
