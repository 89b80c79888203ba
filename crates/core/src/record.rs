//! The plaintext record produced by the SPA decoder, and the access request
//! derived from it after replay/policy validation.

use std::net::IpAddr;

use crate::proto::PortSpec;

/// The fields recovered from a decoded SPA packet, before policy
/// re-validation. The authorization engine may not act on any field here
/// until the replay check has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextRecord {
    /// The client's self-declared username, if the packet carried one.
    pub username: Option<String>,
    /// The `{proto, port}` entries the client is requesting access to.
    pub access_list: Vec<PortSpec>,
    /// The client-requested access timeout in seconds, if any. Subject to
    /// clamping against the matched stanza's configured maximum.
    pub requested_timeout: Option<u32>,
    /// The embedded Unix timestamp, used for the skew-window check.
    pub timestamp: u64,
    /// The client-declared source IP, as distinct from the capture
    /// adaptor's observed source IP (the firewall driver grants against the
    /// observed address; the declared address is logged and may differ
    /// behind NAT).
    pub declared_src_ip: Option<IpAddr>,
}

impl PlaintextRecord {
    /// Constructs a record with no optional fields set.
    #[must_use]
    pub fn new(access_list: Vec<PortSpec>, timestamp: u64) -> Self {
        Self {
            username: None,
            access_list,
            requested_timeout: None,
            timestamp,
            declared_src_ip: None,
        }
    }
}

/// A decoded record paired with the network-observed context needed to
/// re-validate it against an access stanza: the address the packet actually
/// arrived from, and the destination the capture adaptor was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// The address the SPA packet was observed arriving from.
    pub observed_src_ip: IpAddr,
    /// The decoded plaintext fields.
    pub record: PlaintextRecord,
}

impl AccessRequest {
    /// Pairs an observed source address with its decoded record.
    #[must_use]
    pub fn new(observed_src_ip: IpAddr, record: PlaintextRecord) -> Self {
        Self {
            observed_src_ip,
            record,
        }
    }
}
