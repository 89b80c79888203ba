#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The SPA decoder contract: given ciphertext and a set of candidate keys,
//! produce a decoded [`core::record::PlaintextRecord`] plus its digest, or
//! one of a small set of named failure kinds. [`decode`] is pure with
//! respect to daemon state — every input it needs (candidate keys, the
//! current time, the skew window) is a function argument, never an
//! ambient global.
//!
//! # Design
//!
//! This crate is both the contract — the [`CodecError`] taxonomy and the
//! "no ambient key material" invariant — and a reference codec a
//! deployment can use as-is or replace. The
//! wire format below is this crate's own; it is not wire-compatible with
//! any other SPA implementation, and nothing in this workspace assumes it
//! is — the authorization engine is generic over any decoder exposing the
//! same `(payload, keys, now, skew) -> Result<(Record, Digest), CodecError>`
//! signature.
//!
//! Wire format, all integers big-endian:
//!
//! ```text
//! version   : 1 byte   (currently only 1 is accepted)
//! nonce     : 16 bytes (random, used to derive the body keystream)
//! timestamp : 8 bytes  (Unix seconds, the embedded SPA timestamp)
//! body_len  : 2 bytes  (length of the encrypted body that follows)
//! body      : body_len bytes (XOR-keystream-encrypted `username\0ports\0timeout`)
//! tag       : 32 bytes (HMAC-SHA256 over every preceding byte)
//! ```
//!
//! The body keystream is derived by repeating `HMAC-SHA256(key, nonce)`,
//! chaining each block into the next (`block[i+1] = HMAC(key, block[i])`),
//! until it covers `body_len` bytes — a stream cipher built from the same
//! primitive as the authentication tag, so the reference codec needs no
//! additional AEAD dependency. The replay digest is `SHA-256(ciphertext)`:
//! stable across candidate keys, independent of key material, and safe to
//! log.
//!
//! # Invariants
//!
//! - [`decode`] never mutates or retains its inputs; every candidate key is
//!   tried in order and the first HMAC match wins.
//! - A digest is always returned for any payload long enough to contain a
//!   tag, even when every key fails to verify it — [`CodecError`] variants
//!   other than [`CodecError::Malformed`] do not prevent a caller from
//!   still computing [`digest_of`] for logging, though the authorization
//!   engine never does this: the replay cache is only consulted after a
//!   successful decode, per the engine's ordering contract.
//!
//! # Errors
//!
//! See [`CodecError`] for the complete taxonomy; each variant corresponds
//! to exactly one distinguishable decode failure.

use hmac::{Hmac, Mac};
use sha2::{Digest as ShaDigest, Sha256};

use core::digest::Digest;
use core::proto::{PortSpec, parse_port_list};
use core::record::PlaintextRecord;

type HmacSha256 = Hmac<Sha256>;

/// The only wire version this reference codec accepts.
pub const WIRE_VERSION: u8 = 1;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 1 + NONCE_LEN + 8 + 2;

/// Failure kinds a decode attempt can return, one variant per
/// distinguishable cause.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload was too short or structurally inconsistent to be a SPA
    /// packet at all (truncated header, body length overruns the payload).
    #[error("malformed SPA packet")]
    Malformed,
    /// No candidate key produced a matching HMAC tag.
    #[error("HMAC verification failed against every candidate key")]
    HmacMismatch,
    /// The tag matched but the decrypted body was not valid UTF-8 or did
    /// not split into the expected three NUL-separated fields.
    #[error("body decryption did not yield a well-formed record")]
    DecryptFailed,
    /// The embedded timestamp fell outside the allowed skew window.
    #[error("embedded timestamp is outside the allowed skew window")]
    TimestampOutOfWindow,
    /// The wire version byte named a version this codec does not support.
    #[error("unsupported SPA wire version {0}")]
    VersionUnsupported(u8),
}

/// One candidate key the decoder may try, paired with an opaque identifier
/// the access policy assigned it (used only for logging; the decoder does
/// not interpret it).
#[derive(Clone)]
pub struct CandidateKey {
    /// Opaque label, typically the stanza's source pattern, for WARN-level
    /// logging on HMAC failure.
    pub label: String,
    /// The raw symmetric key bytes.
    pub key: Vec<u8>,
}

impl CandidateKey {
    /// Constructs a candidate key directly.
    #[must_use]
    pub fn new(label: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            key,
        }
    }
}

/// Computes the replay digest for a ciphertext payload: `SHA-256(payload)`.
///
/// Exposed separately from [`decode`] so a caller can log the digest of a
/// payload that failed decode (the authorization engine does not do this —
/// see the module invariants — but diagnostics tooling may).
#[must_use]
pub fn digest_of(payload: &[u8]) -> Digest {
    let hash = Sha256::digest(payload);
    Digest::new(hash.to_vec()).expect("SHA-256 output is always within MAX_DIGEST_LEN")
}

/// Decodes one SPA candidate payload.
///
/// `now_unix` and `max_skew_secs` implement the timestamp-window check;
/// passing them as arguments (rather than reading a clock) keeps this
/// function pure and lets tests pin the window precisely.
pub fn decode(
    payload: &[u8],
    keys: &[CandidateKey],
    now_unix: u64,
    max_skew_secs: u64,
) -> Result<(PlaintextRecord, Digest), CodecError> {
    if payload.len() < HEADER_LEN + TAG_LEN {
        return Err(CodecError::Malformed);
    }

    let version = payload[0];
    let nonce = &payload[1..1 + NONCE_LEN];
    let ts_bytes: [u8; 8] = payload[1 + NONCE_LEN..1 + NONCE_LEN + 8]
        .try_into()
        .expect("slice is exactly 8 bytes");
    let timestamp = u64::from_be_bytes(ts_bytes);
    let body_len_bytes: [u8; 2] = payload[HEADER_LEN - 2..HEADER_LEN]
        .try_into()
        .expect("slice is exactly 2 bytes");
    let body_len = u16::from_be_bytes(body_len_bytes) as usize;

    if payload.len() != HEADER_LEN + body_len + TAG_LEN {
        return Err(CodecError::Malformed);
    }

    let message = &payload[..HEADER_LEN + body_len];
    let tag = &payload[HEADER_LEN + body_len..];

    let matched = keys
        .iter()
        .find(|candidate| verify_tag(&candidate.key, message, tag));
    let Some(candidate) = matched else {
        return Err(CodecError::HmacMismatch);
    };

    if version != WIRE_VERSION {
        return Err(CodecError::VersionUnsupported(version));
    }

    let body_ciphertext = &payload[HEADER_LEN..HEADER_LEN + body_len];
    let keystream = derive_keystream(&candidate.key, nonce, body_len);
    let body_plaintext: Vec<u8> = body_ciphertext
        .iter()
        .zip(keystream.iter())
        .map(|(c, k)| c ^ k)
        .collect();

    let record = parse_body(&body_plaintext, timestamp).ok_or(CodecError::DecryptFailed)?;

    let skew = timestamp.abs_diff(now_unix);
    if skew > max_skew_secs {
        return Err(CodecError::TimestampOutOfWindow);
    }

    Ok((record, digest_of(payload)))
}

/// Encodes a SPA packet for a given key, matching [`decode`]'s wire
/// format. Used by tests and by any tool that needs to synthesize packets
/// against this reference codec (there is no production encoder path —
/// the daemon never sends packets).
#[must_use]
pub fn encode(
    key: &[u8],
    nonce: [u8; NONCE_LEN],
    timestamp: u64,
    username: Option<&str>,
    access_list: &[PortSpec],
    timeout: Option<u32>,
) -> Vec<u8> {
    let ports = access_list
        .iter()
        .map(PortSpec::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let timeout_str = timeout.map_or(String::new(), |t| t.to_string());
    let body = format!("{}\0{ports}\0{timeout_str}", username.unwrap_or(""));
    let body_bytes = body.into_bytes();
    let body_len = u16::try_from(body_bytes.len()).expect("encoded body fits in u16");

    let mut message = Vec::with_capacity(HEADER_LEN + body_bytes.len());
    message.push(WIRE_VERSION);
    message.extend_from_slice(&nonce);
    message.extend_from_slice(&timestamp.to_be_bytes());
    message.extend_from_slice(&body_len.to_be_bytes());

    let keystream = derive_keystream(key, &nonce, body_bytes.len());
    let ciphertext: Vec<u8> = body_bytes
        .iter()
        .zip(keystream.iter())
        .map(|(p, k)| p ^ k)
        .collect();
    message.extend_from_slice(&ciphertext);

    let tag = compute_tag(key, &message);
    let mut packet = message;
    packet.extend_from_slice(&tag);
    packet
}

fn verify_tag(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let expected = compute_tag(key, message);
    // Constant-time-ish comparison: length check first, then a fold that
    // does not short-circuit on the first mismatching byte.
    if expected.len() != tag.len() {
        return false;
    }
    expected
        .iter()
        .zip(tag.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn compute_tag(key: &[u8], message: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn derive_keystream(key: &[u8], nonce: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut block = {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(nonce);
        mac.finalize().into_bytes().to_vec()
    };
    while out.len() < len {
        out.extend_from_slice(&block);
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&block);
        block = mac.finalize().into_bytes().to_vec();
    }
    out.truncate(len);
    out
}

fn parse_body(body: &[u8], timestamp: u64) -> Option<PlaintextRecord> {
    let text = std::str::from_utf8(body).ok()?;
    let mut parts = text.splitn(3, '\0');
    let username = parts.next()?;
    let ports_str = parts.next()?;
    let timeout_str = parts.next()?;

    let access_list = parse_port_list(ports_str).ok()?;
    let requested_timeout = if timeout_str.is_empty() {
        None
    } else {
        timeout_str.parse::<u32>().ok()
    };

    let mut record = PlaintextRecord::new(access_list, timestamp);
    record.username = if username.is_empty() {
        None
    } else {
        Some(username.to_string())
    };
    record.requested_timeout = requested_timeout;
    Some(record)
}
