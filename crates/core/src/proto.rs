//! Transport-protocol and port-spec parsing.
//!
//! Access stanzas and firewall rules both need to talk about "tcp port 22"
//! in a structured way. [`Protocol`] and [`PortSpec`] give every crate in
//! the workspace the same parser for the `proto/port` grammar used by the
//! access file's `OPEN_PORTS`/`RESTRICT_PORTS` directives.

use std::fmt;
use std::str::FromStr;

/// A transport-layer protocol recognised by the access policy and firewall driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP (port field is meaningless; `PortSpec` is always `Any` for ICMP requests).
    Icmp,
}

impl Protocol {
    /// Returns the lowercase name used in config files and firewall comments.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a `proto` token does not name a recognised protocol.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unrecognised protocol `{0}`")]
pub struct ProtocolParseError(pub String);

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            other => Err(ProtocolParseError(other.to_string())),
        }
    }
}

/// A single `{protocol, port}` entry in a permit/deny list or access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    /// The transport protocol.
    pub proto: Protocol,
    /// The port number. Ignored (but present) for ICMP entries.
    pub port: u16,
}

impl PortSpec {
    /// Constructs a port spec directly.
    #[must_use]
    pub fn new(proto: Protocol, port: u16) -> Self {
        Self { proto, port }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.proto, self.port)
    }
}

/// Error parsing a `proto/port` token.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PortSpecParseError {
    /// The token did not contain exactly one `/` separator.
    #[error("expected `proto/port`, got `{0}`")]
    Malformed(String),
    /// The protocol half did not parse.
    #[error(transparent)]
    Protocol(#[from] ProtocolParseError),
    /// The port half was not a valid `u16`.
    #[error("invalid port number in `{0}`")]
    Port(String),
}

impl FromStr for PortSpec {
    type Err = PortSpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (proto_str, port_str) = trimmed
            .split_once('/')
            .ok_or_else(|| PortSpecParseError::Malformed(trimmed.to_string()))?;
        let proto: Protocol = proto_str.trim().parse()?;
        let port: u16 = port_str
            .trim()
            .parse()
            .map_err(|_| PortSpecParseError::Port(trimmed.to_string()))?;
        Ok(PortSpec::new(proto, port))
    }
}

/// Parses a comma-separated `proto/port` list, as used by `OPEN_PORTS` and
/// `RESTRICT_PORTS` in the access file.
pub fn parse_port_list(s: &str) -> Result<Vec<PortSpec>, PortSpecParseError> {
    s.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_protocols_case_insensitively() {
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("Udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("icmp".parse::<Protocol>().unwrap(), Protocol::Icmp);
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn parses_port_spec() {
        let spec: PortSpec = "tcp/22".parse().unwrap();
        assert_eq!(spec, PortSpec::new(Protocol::Tcp, 22));
    }

    #[test]
    fn rejects_malformed_port_spec() {
        assert!("tcp22".parse::<PortSpec>().is_err());
        assert!("tcp/notaport".parse::<PortSpec>().is_err());
    }

    #[test]
    fn parses_comma_separated_port_list() {
        let list = parse_port_list("tcp/22, udp/53,tcp/443").unwrap();
        assert_eq!(
            list,
            vec![
                PortSpec::new(Protocol::Tcp, 22),
                PortSpec::new(Protocol::Udp, 53),
                PortSpec::new(Protocol::Tcp, 443),
            ]
        );
    }

    #[test]
    fn empty_port_list_parses_to_empty_vec() {
        assert!(parse_port_list("").unwrap().is_empty());
    }
}
