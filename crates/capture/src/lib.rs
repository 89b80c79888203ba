#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The capture adaptor: pulls raw frames from a [`FrameSource`] and
//! extracts [`core::candidate::PacketCandidate`]s from them. The adaptor
//! never interprets payload bytes — that is the SPA decoder's job — it
//! only recovers the 5-tuple and truncates the payload to the configured
//! sniff-byte limit.
//!
//! # Design
//!
//! [`FrameSource`] is the trait boundary at the capture layer: a
//! real deployment implements it over a libpcap-equivalent capture handle
//! bound to an interface and BPF-style filter expression; this crate also
//! ships [`InMemoryFrameSource`], a deterministic queue used by tests and
//! by `-C`-bounded runs that want reproducible input. Both share the same
//! [`CaptureAdaptor::next_candidate`] extraction path.
//!
//! A [`RawFrame`] is modeled as the IP-layer bytes of a captured packet —
//! this adaptor assumes the underlying capture driver has already stripped
//! any link-layer (Ethernet, Linux "cooked") framing, which matches a
//! `DLT_RAW`-equivalent capture handle. Extraction supports IPv4 and IPv6,
//! with TCP, UDP, and ICMP/ICMPv6 transport headers (ports are absent for
//! ICMP, matching [`core::candidate::PacketCandidate`]'s optional port
//! fields).
//!
//! # Invariants
//!
//! - The adaptor performs no payload interpretation; `payload` in the
//!   extracted candidate is an opaque byte slice truncated at the
//!   configured sniff limit.
//! - Once [`CaptureAdaptor`] reports [`CaptureOutcome::LimitReached`], it
//!   reports `None` on every subsequent call — the packet-count limit is a
//!   one-shot transition to graceful shutdown, not a resettable counter.
//!
//! # Errors
//!
//! Malformed framing (truncated header, an unsupported IP version, a
//! transport header that does not fit in the remaining bytes) yields
//! [`CaptureError::Parse`]. A parse failure never stops the adaptor;
//! [`CaptureAdaptor`] surfaces it as one item and continues to the next
//! frame.

use std::collections::VecDeque;
use std::net::IpAddr;

use core::candidate::PacketCandidate;
use core::proto::Protocol;

/// A raw frame as handed to the capture adaptor: IP-layer bytes, plus an
/// informational link-layer source address when the capture driver
/// supplies one (never used for authorization decisions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Informational link-layer source address (e.g. a MAC address
    /// string), if the capture driver exposed one.
    pub link_src: Option<String>,
    /// The IP-layer packet bytes.
    pub bytes: Vec<u8>,
}

impl RawFrame {
    /// Constructs a raw frame with no link-layer information.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            link_src: None,
            bytes,
        }
    }
}

/// A source of raw captured frames.
///
/// Implemented by a real pcap-equivalent capture handle in production;
/// [`InMemoryFrameSource`] implements it for tests.
pub trait FrameSource {
    /// Returns the next captured frame, or `None` if the source is
    /// exhausted (end of a pcap replay file, or an explicitly closed
    /// live capture).
    fn next_frame(&mut self) -> Option<RawFrame>;
}

/// A deterministic, in-memory [`FrameSource`] backed by a fixed queue of
/// frames, used by tests and reproducible `-C`-bounded runs.
#[derive(Debug, Default)]
pub struct InMemoryFrameSource {
    frames: VecDeque<RawFrame>,
}

impl InMemoryFrameSource {
    /// Builds a source that will yield `frames` in order, then report
    /// exhaustion.
    #[must_use]
    pub fn new(frames: impl IntoIterator<Item = RawFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for InMemoryFrameSource {
    fn next_frame(&mut self) -> Option<RawFrame> {
        self.frames.pop_front()
    }
}

/// Failure extracting a candidate from a raw frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The frame's IP/transport framing was too short, internally
    /// inconsistent, or named an unsupported IP version.
    #[error("malformed frame: {0}")]
    Parse(String),
}

/// The result of one [`CaptureAdaptor::next_candidate`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A candidate was extracted successfully.
    Candidate(PacketCandidate),
    /// The frame could not be parsed; the adaptor logs this at the
    /// authorization engine's silent-drop level and continues.
    Malformed(CaptureError),
    /// The configured packet-count limit (`-C`) has just been reached;
    /// the control plane should begin graceful shutdown.
    LimitReached,
}

/// Pulls frames from a [`FrameSource`] and extracts candidates from them,
/// enforcing a per-frame sniff-byte limit and an optional total
/// packet-count limit.
pub struct CaptureAdaptor<S> {
    source: S,
    sniff_byte_limit: usize,
    packet_limit: Option<u64>,
    processed: u64,
    limit_signaled: bool,
}

impl<S: FrameSource> CaptureAdaptor<S> {
    /// Constructs an adaptor over `source`. `sniff_byte_limit` bounds
    /// per-frame payload memory; `packet_limit` mirrors `-C`.
    pub fn new(source: S, sniff_byte_limit: usize, packet_limit: Option<u64>) -> Self {
        Self {
            source,
            sniff_byte_limit,
            packet_limit,
            processed: 0,
            limit_signaled: false,
        }
    }

    /// Returns the next outcome: a candidate, a parse failure, a
    /// one-shot limit-reached signal, or `None` once the source and any
    /// configured limit are both exhausted.
    pub fn next_candidate(&mut self) -> Option<CaptureOutcome> {
        if self.limit_signaled {
            return None;
        }
        if let Some(limit) = self.packet_limit {
            if self.processed >= limit {
                self.limit_signaled = true;
                return Some(CaptureOutcome::LimitReached);
            }
        }

        let frame = self.source.next_frame()?;
        self.processed += 1;
        match extract_candidate(&frame, self.sniff_byte_limit) {
            Ok(candidate) => Some(CaptureOutcome::Candidate(candidate)),
            Err(error) => Some(CaptureOutcome::Malformed(error)),
        }
    }

    /// Number of frames pulled from the source so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

/// Extracts a [`PacketCandidate`] from a raw IP-layer frame.
pub fn extract_candidate(
    frame: &RawFrame,
    sniff_byte_limit: usize,
) -> Result<PacketCandidate, CaptureError> {
    let bytes = &frame.bytes;
    if bytes.is_empty() {
        return Err(CaptureError::Parse("empty frame".to_string()));
    }

    let version = bytes[0] >> 4;
    match version {
        4 => extract_ipv4(bytes, sniff_byte_limit),
        6 => extract_ipv6(bytes, sniff_byte_limit),
        other => Err(CaptureError::Parse(format!("unsupported IP version {other}"))),
    }
}

fn extract_ipv4(bytes: &[u8], sniff_byte_limit: usize) -> Result<PacketCandidate, CaptureError> {
    if bytes.len() < 20 {
        return Err(CaptureError::Parse("IPv4 header truncated".to_string()));
    }
    let ihl = usize::from(bytes[0] & 0x0f) * 4;
    if ihl < 20 || bytes.len() < ihl {
        return Err(CaptureError::Parse("invalid IPv4 IHL".to_string()));
    }
    let proto_byte = bytes[9];
    let src_ip = IpAddr::from([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let dst_ip = IpAddr::from([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let transport = &bytes[ihl..];
    build_candidate(src_ip, dst_ip, proto_byte, transport, sniff_byte_limit)
}

fn extract_ipv6(bytes: &[u8], sniff_byte_limit: usize) -> Result<PacketCandidate, CaptureError> {
    const HEADER_LEN: usize = 40;
    if bytes.len() < HEADER_LEN {
        return Err(CaptureError::Parse("IPv6 header truncated".to_string()));
    }
    let next_header = bytes[6];
    let mut src = [0u8; 16];
    src.copy_from_slice(&bytes[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&bytes[24..40]);
    let src_ip = IpAddr::from(src);
    let dst_ip = IpAddr::from(dst);
    let transport = &bytes[HEADER_LEN..];
    build_candidate(src_ip, dst_ip, next_header, transport, sniff_byte_limit)
}

fn build_candidate(
    src_ip: IpAddr,
    dst_ip: IpAddr,
    proto_byte: u8,
    transport: &[u8],
    sniff_byte_limit: usize,
) -> Result<PacketCandidate, CaptureError> {
    let (proto, src_port, dst_port, payload_offset) = match proto_byte {
        6 => {
            if transport.len() < 20 {
                return Err(CaptureError::Parse("TCP header truncated".to_string()));
            }
            let data_offset = usize::from(transport[12] >> 4) * 4;
            if data_offset < 20 || transport.len() < data_offset {
                return Err(CaptureError::Parse("invalid TCP data offset".to_string()));
            }
            (
                Protocol::Tcp,
                Some(u16::from_be_bytes([transport[0], transport[1]])),
                Some(u16::from_be_bytes([transport[2], transport[3]])),
                data_offset,
            )
        }
        17 => {
            if transport.len() < 8 {
                return Err(CaptureError::Parse("UDP header truncated".to_string()));
            }
            (
                Protocol::Udp,
                Some(u16::from_be_bytes([transport[0], transport[1]])),
                Some(u16::from_be_bytes([transport[2], transport[3]])),
                8,
            )
        }
        1 | 58 => (Protocol::Icmp, None, None, transport.len().min(8)),
        other => {
            return Err(CaptureError::Parse(format!(
                "unsupported transport protocol {other}"
            )));
        }
    };

    let payload = transport.get(payload_offset..).unwrap_or(&[]);
    let truncated: Vec<u8> = payload
        .iter()
        .copied()
        .take(sniff_byte_limit)
        .collect();

    Ok(PacketCandidate::new(
        src_ip, dst_ip, src_port, dst_port, proto, truncated,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_ipv4_frame(payload: &[u8]) -> RawFrame {
        let mut bytes = vec![0u8; 20 + 8 + payload.len()];
        bytes[0] = 0x45;
        bytes[9] = 17;
        bytes[12..16].copy_from_slice(&[203, 0, 113, 5]);
        bytes[16..20].copy_from_slice(&[198, 51, 100, 1]);
        bytes[20..22].copy_from_slice(&62201u16.to_be_bytes());
        bytes[22..24].copy_from_slice(&62201u16.to_be_bytes());
        let len = 8 + payload.len();
        bytes[24..26].copy_from_slice(&(len as u16).to_be_bytes());
        bytes[28..].copy_from_slice(payload);
        RawFrame::new(bytes)
    }

    #[test]
    fn extracts_udp_ipv4_candidate() {
        let frame = udp_ipv4_frame(b"hello-spa");
        let candidate = extract_candidate(&frame, 4096).unwrap();
        assert_eq!(candidate.proto, Protocol::Udp);
        assert_eq!(candidate.src_ip, IpAddr::from([203, 0, 113, 5]));
        assert_eq!(candidate.dst_port, Some(62201));
        assert_eq!(candidate.payload, b"hello-spa".to_vec());
    }

    #[test]
    fn truncates_payload_at_sniff_limit() {
        let frame = udp_ipv4_frame(b"0123456789");
        let candidate = extract_candidate(&frame, 4).unwrap();
        assert_eq!(candidate.payload, b"0123".to_vec());
    }

    #[test]
    fn rejects_empty_frame() {
        assert!(matches!(
            extract_candidate(&RawFrame::new(vec![]), 100),
            Err(CaptureError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unsupported_ip_version() {
        let bytes = vec![0x55; 20];
        assert!(matches!(
            extract_candidate(&RawFrame::new(bytes), 100),
            Err(CaptureError::Parse(_))
        ));
    }

    #[test]
    fn rejects_truncated_udp_header() {
        let mut bytes = vec![0u8; 20 + 4];
        bytes[0] = 0x45;
        bytes[9] = 17;
        assert!(matches!(
            extract_candidate(&RawFrame::new(bytes), 100),
            Err(CaptureError::Parse(_))
        ));
    }

    #[test]
    fn icmp_candidate_has_no_ports() {
        let mut bytes = vec![0u8; 20 + 8];
        bytes[0] = 0x45;
        bytes[9] = 1;
        let candidate = extract_candidate(&RawFrame::new(bytes), 100).unwrap();
        assert_eq!(candidate.proto, Protocol::Icmp);
        assert_eq!(candidate.src_port, None);
        assert_eq!(candidate.dst_port, None);
    }

    #[test]
    fn adaptor_stops_after_packet_limit_and_signals_once() {
        let frames = vec![udp_ipv4_frame(b"a"), udp_ipv4_frame(b"b"), udp_ipv4_frame(b"c")];
        let mut adaptor = CaptureAdaptor::new(InMemoryFrameSource::new(frames), 4096, Some(2));

        assert!(matches!(
            adaptor.next_candidate(),
            Some(CaptureOutcome::Candidate(_))
        ));
        assert!(matches!(
            adaptor.next_candidate(),
            Some(CaptureOutcome::Candidate(_))
        ));
        assert!(matches!(
            adaptor.next_candidate(),
            Some(CaptureOutcome::LimitReached)
        ));
        assert_eq!(adaptor.next_candidate(), None);
    }

    #[test]
    fn adaptor_reports_exhaustion_without_a_limit() {
        let frames = vec![udp_ipv4_frame(b"a")];
        let mut adaptor = CaptureAdaptor::new(InMemoryFrameSource::new(frames), 4096, None);
        assert!(adaptor.next_candidate().is_some());
        assert_eq!(adaptor.next_candidate(), None);
    }
}
