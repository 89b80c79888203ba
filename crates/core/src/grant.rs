//! The `{proto, port, src_ip, expiry}` tuple emitted by authorization and
//! consumed by the firewall driver.

use std::net::IpAddr;

use crate::proto::PortSpec;

/// A single firewall rule to install, with the Unix timestamp at which it
/// should expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Grant {
    /// The protocol/port to open.
    pub port_spec: PortSpec,
    /// The source address to restrict the opening to.
    pub src_ip: IpAddr,
    /// The Unix timestamp at which the firewall driver must remove this
    /// rule.
    pub expiry: u64,
}

impl Grant {
    /// Constructs a grant directly.
    #[must_use]
    pub fn new(port_spec: PortSpec, src_ip: IpAddr, expiry: u64) -> Self {
        Self {
            port_spec,
            src_ip,
            expiry,
        }
    }

    /// Returns whether this grant has expired as of `now_unix`.
    #[must_use]
    pub fn is_expired(&self, now_unix: u64) -> bool {
        now_unix >= self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Protocol;

    #[test]
    fn expiry_comparison_is_inclusive() {
        let grant = Grant::new(
            PortSpec::new(Protocol::Tcp, 22),
            "203.0.113.1".parse().unwrap(),
            1_700_000_100,
        );
        assert!(!grant.is_expired(1_700_000_099));
        assert!(grant.is_expired(1_700_000_100));
        assert!(grant.is_expired(1_700_000_101));
    }
}
