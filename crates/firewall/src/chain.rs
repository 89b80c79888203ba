//! Chain topology and per-chain bookkeeping.

use std::net::IpAddr;

use core::proto::Protocol;

/// Which address field of the filter rule the granted source IP
/// populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Match the grant's source IP against the rule's source address.
    Src,
    /// Match the grant's source IP against the rule's destination address
    /// (used for NAT'd or reverse-proxied deployments).
    Dst,
    /// Match against both source and destination address fields.
    Both,
}

/// A configured binding between the daemon and one external-filter chain.
#[derive(Debug, Clone)]
pub struct ChainBinding {
    /// The logical name this binding is keyed by in configuration (e.g.
    /// `"input"`), distinct from the literal chain name installed in the
    /// filter.
    pub kind: String,
    /// The verdict target installed rules jump to (e.g. `"ACCEPT"`).
    pub target_verdict: String,
    /// Which address field the grant's source IP is matched against.
    pub direction: Direction,
    /// The filter table this chain lives in (e.g. `"filter"`).
    pub table: String,
    /// The host chain the jump rule is inserted into (shared with the
    /// host; never flushed or deleted by this daemon).
    pub from_chain: String,
    /// The position within `from_chain` the jump rule is inserted at.
    pub jump_position: u32,
    /// The daemon-owned chain receiving installed rules. Exclusively
    /// owned: created at startup, flushed and deleted at shutdown.
    pub to_chain: String,
    /// The position within `to_chain` new grant rules are inserted at.
    pub initial_rule_position: u32,
}

/// Per-chain bookkeeping: an approximate rule count and expiry hint, both
/// non-authoritative — the external filter's rule comments are the one
/// source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerChainCounter {
    /// Approximate count of currently-installed daemon rules in this
    /// chain.
    pub active_rules: u64,
    /// The soonest known expiry among currently-installed rules, used to
    /// skip a reap pass that would find nothing to do. `None` means "no
    /// next expiry known" rather than an uninitialized sentinel value —
    /// see the Open Questions resolution in `DESIGN.md`.
    pub next_expiry: Option<u64>,
}

impl PerChainCounter {
    /// Whether a reap pass against this chain at `now` can be skipped
    /// entirely without listing the external filter's rules.
    #[must_use]
    pub fn reap_is_unnecessary(&self, now: u64) -> bool {
        self.active_rules == 0 || self.next_expiry.is_some_and(|next| next > now)
    }

    /// Records a freshly-installed grant, advancing the next-expiry hint
    /// if the new rule expires sooner than the current hint.
    pub fn record_install(&mut self, expiry: u64) {
        self.active_rules += 1;
        self.next_expiry = Some(self.next_expiry.map_or(expiry, |current| current.min(expiry)));
    }
}

/// One entry from an external-filter chain listing: the rule's current
/// position and, if present, the expiry parsed from its `_exp_` comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListedRule {
    /// The rule's 1-indexed position at the time it was listed.
    pub number: u32,
    /// The parsed expiry, or `None` if the rule carries no `_exp_`
    /// comment — interpreted as external interference (an operator
    /// installed or left a rule the daemon does not recognize as its own).
    pub expiry: Option<u64>,
}

/// A single grant to install, resolved to the concrete match fields a
/// backend composes into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantSpec {
    /// Transport protocol to match.
    pub proto: Protocol,
    /// Source address the rule authorizes.
    pub src_ip: IpAddr,
    /// Destination port to match.
    pub dst_port: u16,
    /// Unix timestamp at which this rule must be reaped.
    pub expiry: u64,
}

/// Builds the literal `_exp_<unix_seconds>` comment every installed rule
/// carries, the durable record of its expiry across daemon restarts.
#[must_use]
pub fn expiry_comment(expiry: u64) -> String {
    format!("_exp_{expiry}")
}

/// Parses an `_exp_<unix_seconds>` comment out of an arbitrary line of
/// listing output. Returns `None` if no such substring is present.
#[must_use]
pub fn parse_expiry_comment(line: &str) -> Option<u64> {
    let start = line.find("_exp_")? + "_exp_".len();
    let digits: String = line[start..].chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_is_unnecessary_when_no_rules_active() {
        let counter = PerChainCounter::default();
        assert!(counter.reap_is_unnecessary(1_700_000_000));
    }

    #[test]
    fn reap_is_unnecessary_before_next_expiry() {
        let mut counter = PerChainCounter::default();
        counter.record_install(1_700_000_100);
        assert!(counter.reap_is_unnecessary(1_700_000_050));
        assert!(!counter.reap_is_unnecessary(1_700_000_150));
    }

    #[test]
    fn record_install_tracks_the_soonest_expiry() {
        let mut counter = PerChainCounter::default();
        counter.record_install(1_700_000_200);
        counter.record_install(1_700_000_100);
        assert_eq!(counter.active_rules, 2);
        assert_eq!(counter.next_expiry, Some(1_700_000_100));
    }

    #[test]
    fn parses_expiry_comment_from_a_listing_line() {
        let line = "1    ACCEPT     tcp  --  10.1.2.3   0.0.0.0/0   tcp dpt:22 /* _exp_1700000030 */";
        assert_eq!(parse_expiry_comment(line), Some(1_700_000_030));
    }

    #[test]
    fn returns_none_without_a_comment() {
        let line = "2    ACCEPT     tcp  --  10.1.2.4   0.0.0.0/0   tcp dpt:22";
        assert_eq!(parse_expiry_comment(line), None);
    }

    #[test]
    fn expiry_comment_round_trips() {
        assert_eq!(parse_expiry_comment(&expiry_comment(1_700_000_042)), Some(1_700_000_042));
    }
}
