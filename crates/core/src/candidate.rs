//! The candidate a capture adaptor hands to the SPA decoder.
//!
//! A [`PacketCandidate`] is the result of extracting the 5-tuple and payload
//! out of a raw captured frame; the capture adaptor never interprets the
//! payload, so everything past that extraction belongs to the codec.

use std::net::IpAddr;

use crate::proto::Protocol;

/// A packet extracted from a captured frame, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketCandidate {
    /// The source address the frame arrived from.
    pub src_ip: IpAddr,
    /// The destination address the frame was addressed to.
    pub dst_ip: IpAddr,
    /// The source port, if the transport protocol carries one.
    pub src_port: Option<u16>,
    /// The destination port, if the transport protocol carries one.
    pub dst_port: Option<u16>,
    /// The transport protocol the frame was carried over.
    pub proto: Protocol,
    /// The raw payload bytes, truncated to the configured sniff-byte limit.
    pub payload: Vec<u8>,
}

impl PacketCandidate {
    /// Constructs a candidate directly.
    #[must_use]
    pub fn new(
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: Option<u16>,
        dst_port: Option<u16>,
        proto: Protocol,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            proto,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_candidate_with_all_fields() {
        let candidate = PacketCandidate::new(
            "203.0.113.5".parse().unwrap(),
            "203.0.113.1".parse().unwrap(),
            Some(44321),
            Some(62201),
            Protocol::Udp,
            vec![1, 2, 3],
        );
        assert_eq!(candidate.proto, Protocol::Udp);
        assert_eq!(candidate.payload, vec![1, 2, 3]);
    }
}
