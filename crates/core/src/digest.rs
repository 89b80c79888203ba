//! The replay-cache key computed over a decoded SPA packet.
//!
//! The reference codec defines the digest as SHA-256 over the ciphertext
//! (see `spa_codec`); this module only owns the resulting bytes and their
//! hex rendering, so the replay store and logging layer can treat a digest
//! as an opaque, `Display`-able, hashable value.

use std::fmt;

/// Maximum digest length in bytes. The reference codec produces 32-byte
/// SHA-256 digests; the cap matches the widest hash the wire format could
/// plausibly carry (SHA-512) without the replay cache's on-disk line format
/// growing unbounded.
pub const MAX_DIGEST_LEN: usize = 64;

/// A collision-resistant digest identifying a decoded SPA record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    bytes: Vec<u8>,
}

/// Error constructing a [`Digest`] from raw bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    /// The provided byte slice exceeded [`MAX_DIGEST_LEN`].
    #[error("digest length {0} exceeds the maximum of {MAX_DIGEST_LEN}")]
    TooLong(usize),
    /// The provided byte slice was empty.
    #[error("digest cannot be empty")]
    Empty,
    /// A hex string failed to decode.
    #[error("invalid hex digest `{0}`")]
    InvalidHex(String),
}

impl Digest {
    /// Builds a digest from raw bytes, validating the length invariant.
    pub fn new(bytes: Vec<u8>) -> Result<Self, DigestError> {
        if bytes.is_empty() {
            return Err(DigestError::Empty);
        }
        if bytes.len() > MAX_DIGEST_LEN {
            return Err(DigestError::TooLong(bytes.len()));
        }
        Ok(Self { bytes })
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parses a digest from its lowercase hex rendering, as stored in the
    /// replay cache's on-disk line format.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        if s.is_empty() || s.len() % 2 != 0 {
            return Err(DigestError::InvalidHex(s.to_string()));
        }
        let mut bytes = Vec::with_capacity(s.len() / 2);
        let chars: Vec<char> = s.chars().collect();
        for pair in chars.chunks(2) {
            let byte = u8::from_str_radix(&pair.iter().collect::<String>(), 16)
                .map_err(|_| DigestError::InvalidHex(s.to_string()))?;
            bytes.push(byte);
        }
        Digest::new(bytes)
    }

    /// Renders the digest as lowercase hex, matching the replay cache's
    /// on-disk line format.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let digest = Digest::new(vec![0xde, 0xad, 0xbe, 0xef]).unwrap();
        let hex = digest.to_hex();
        assert_eq!(hex, "deadbeef");
        assert_eq!(Digest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn rejects_empty_digest() {
        assert_eq!(Digest::new(vec![]).unwrap_err(), DigestError::Empty);
    }

    #[test]
    fn rejects_oversized_digest() {
        let bytes = vec![0u8; MAX_DIGEST_LEN + 1];
        assert_eq!(
            Digest::new(bytes).unwrap_err(),
            DigestError::TooLong(MAX_DIGEST_LEN + 1)
        );
    }

    #[test]
    fn rejects_odd_length_hex() {
        assert!(Digest::from_hex("abc").is_err());
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert!(Digest::from_hex("zz").is_err());
    }
}
