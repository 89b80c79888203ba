//! Source-address pattern matching for access stanzas.
//!
//! The access file keys each stanza with a `SOURCE` line that may be a bare
//! IP, a CIDR block, or the literal wildcard `ANY`. [`SourcePattern`] parses
//! that grammar once so the access-policy lookup and any diagnostic tooling
//! (`dump-config`, `fw-list`) agree on what a pattern means.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// A parsed `SOURCE` pattern from the access file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePattern {
    /// Matches any source address. Written as `ANY` in the access file.
    Any,
    /// Matches exactly one address.
    Exact(IpAddr),
    /// Matches any address within a CIDR block.
    Cidr(IpNet),
}

impl SourcePattern {
    /// Returns whether `addr` falls within this pattern.
    #[must_use]
    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            SourcePattern::Any => true,
            SourcePattern::Exact(exact) => *exact == addr,
            SourcePattern::Cidr(net) => net.contains(&addr),
        }
    }
}

impl fmt::Display for SourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePattern::Any => f.write_str("ANY"),
            SourcePattern::Exact(addr) => write!(f, "{addr}"),
            SourcePattern::Cidr(net) => write!(f, "{net}"),
        }
    }
}

/// Error parsing a `SOURCE` pattern.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid source pattern `{0}`")]
pub struct SourcePatternParseError(pub String);

impl FromStr for SourcePattern {
    type Err = SourcePatternParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("any") {
            return Ok(SourcePattern::Any);
        }
        if trimmed.contains('/') {
            let net: IpNet = trimmed
                .parse()
                .map_err(|_| SourcePatternParseError(trimmed.to_string()))?;
            return Ok(SourcePattern::Cidr(net));
        }
        let addr: IpAddr = trimmed
            .parse()
            .map_err(|_| SourcePatternParseError(trimmed.to_string()))?;
        Ok(SourcePattern::Exact(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        let pattern = SourcePattern::Any;
        assert!(pattern.matches("203.0.113.7".parse().unwrap()));
        assert!(pattern.matches("::1".parse().unwrap()));
    }

    #[test]
    fn exact_matches_only_itself() {
        let pattern: SourcePattern = "10.1.2.3".parse().unwrap();
        assert!(pattern.matches("10.1.2.3".parse().unwrap()));
        assert!(!pattern.matches("10.1.2.4".parse().unwrap()));
    }

    #[test]
    fn cidr_matches_within_block() {
        let pattern: SourcePattern = "10.0.0.0/8".parse().unwrap();
        assert!(pattern.matches("10.255.0.1".parse().unwrap()));
        assert!(!pattern.matches("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn cidr_handles_ipv6() {
        let pattern: SourcePattern = "2001:db8::/32".parse().unwrap();
        assert!(pattern.matches("2001:db8::1".parse().unwrap()));
        assert!(!pattern.matches("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-an-ip".parse::<SourcePattern>().is_err());
        assert!("10.0.0.0/99".parse::<SourcePattern>().is_err());
    }
}
