//! The authorization engine: the fixed source-match → decode → replay →
//! policy pipeline that turns one captured candidate into zero or more
//! grants.

use access::{AccessPolicy, PolicyError};
use core::candidate::PacketCandidate;
use core::clock::Clock;
use core::grant::Grant;
use replay::{ReplayContext, ReplayStore, Verdict};

/// Tunables the engine needs beyond the access policy itself.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Acceptable clock skew for the embedded SPA timestamp, in seconds.
    pub skew_window_secs: u64,
    /// Access-grant timeout applied when a request does not specify one.
    pub default_timeout_secs: u32,
}

/// Orchestrates one candidate through the fixed pipeline: source match,
/// decode, replay check, policy re-validation, grant emission.
///
/// Never returns an error from [`AuthorizationEngine::authorize`] — every
/// failure is logged at the level its kind calls for and yields an empty
/// grant list, so no failure can propagate past the main loop.
pub struct AuthorizationEngine<S> {
    policy: AccessPolicy,
    replay: S,
    clock: Box<dyn Clock>,
    config: EngineConfig,
}

impl<S: ReplayStore> AuthorizationEngine<S> {
    /// Constructs an engine over a loaded policy, a replay store, and a
    /// clock source.
    pub fn new(policy: AccessPolicy, replay: S, clock: Box<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            policy,
            replay,
            clock,
            config,
        }
    }

    /// The clock this engine was constructed with, for the control plane's
    /// reap-tick scheduling.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Number of distinct digests currently recorded by the replay store.
    #[must_use]
    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    /// Replaces the loaded access policy, e.g. on a config-reload signal.
    /// The firewall driver and replay cache are untouched.
    pub fn reload_policy(&mut self, policy: AccessPolicy) {
        self.policy = policy;
    }

    /// Runs one candidate through the pipeline, returning the grants to
    /// install (empty if the candidate was dropped at any stage).
    pub fn authorize(&mut self, candidate: PacketCandidate) -> Vec<Grant> {
        let Some(stanza) = self.policy.match_source(candidate.src_ip) else {
            tracing::info!(src_ip = %candidate.src_ip, "no access stanza matched source; dropping silently");
            return Vec::new();
        };

        let now = self.clock.now_unix();
        let (record, digest) =
            match codec::decode(&candidate.payload, &stanza.keys, now, self.config.skew_window_secs) {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::warn!(src_ip = %candidate.src_ip, %error, "SPA decode failed; dropping silently");
                    return Vec::new();
                }
            };

        let context = ReplayContext {
            proto: candidate.proto,
            src_ip: candidate.src_ip,
            src_port: candidate.src_port.unwrap_or(0),
            dst_ip: candidate.dst_ip,
            dst_port: candidate.dst_port.unwrap_or(0),
        };

        match self.replay.check_and_record(&digest, context, now) {
            Ok(Verdict::Fresh) => {}
            Ok(Verdict::Replay(entry)) => {
                tracing::warn!(
                    src_ip = %candidate.src_ip,
                    first_seen = entry.created,
                    replay_count = entry.replay_count,
                    "replayed SPA digest; dropping"
                );
                return Vec::new();
            }
            Err(error) => {
                // The in-memory set has already accepted the digest; refusing
                // the grant over a disk write failure would reopen the
                // replay window on the very packet that detected it.
                tracing::warn!(src_ip = %candidate.src_ip, %error, "replay cache write failed; proceeding on the in-memory accept");
            }
        }

        let granted = match stanza.validate(&record) {
            Ok(ports) => ports,
            Err(PolicyError::Deny(reason)) => {
                tracing::info!(src_ip = %candidate.src_ip, reason, "access denied by policy; dropping silently");
                return Vec::new();
            }
            Err(PolicyError::NoMatch) => {
                tracing::info!(src_ip = %candidate.src_ip, "access stanza declined to match on re-validation; dropping silently");
                return Vec::new();
            }
        };

        let timeout = stanza.clamp_timeout(record.requested_timeout, self.config.default_timeout_secs);
        let expiry = now + u64::from(timeout);

        granted
            .into_iter()
            .map(|port_spec| Grant::new(port_spec, candidate.src_ip, expiry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::clock::FixedClock;
    use core::proto::{PortSpec, Protocol};
    use replay::IndexedStore;

    const SAMPLE_POLICY: &str = "\
SOURCE 10.0.0.0/8
KEY supersecret
OPEN_PORTS tcp/22
MAX_FW_TIMEOUT 30
";

    fn engine(now: u64) -> AuthorizationEngine<IndexedStore> {
        let policy = AccessPolicy::parse(SAMPLE_POLICY).unwrap();
        AuthorizationEngine::new(
            policy,
            IndexedStore::new(),
            Box::new(FixedClock(now)),
            EngineConfig {
                skew_window_secs: 120,
                default_timeout_secs: 30,
            },
        )
    }

    fn candidate_with_payload(payload: Vec<u8>) -> PacketCandidate {
        PacketCandidate::new(
            "10.1.2.3".parse().unwrap(),
            "198.51.100.1".parse().unwrap(),
            Some(44123),
            Some(62201),
            Protocol::Udp,
            payload,
        )
    }

    #[test]
    fn drops_silently_when_no_stanza_matches_source() {
        let mut engine = engine(1_700_000_000);
        let candidate = PacketCandidate::new(
            "203.0.113.9".parse().unwrap(),
            "198.51.100.1".parse().unwrap(),
            None,
            None,
            Protocol::Icmp,
            vec![],
        );
        assert!(engine.authorize(candidate).is_empty());
    }

    #[test]
    fn grants_one_rule_per_permitted_port_on_valid_packet() {
        let now = 1_700_000_000;
        let mut engine = engine(now);
        let packet = codec::encode(
            b"supersecret",
            [9u8; 16],
            now,
            Some("alice"),
            &[PortSpec::new(Protocol::Tcp, 22)],
            None,
        );
        let grants = engine.authorize(candidate_with_payload(packet));
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].port_spec, PortSpec::new(Protocol::Tcp, 22));
        assert_eq!(grants[0].expiry, now + 30);
    }

    #[test]
    fn second_identical_packet_is_a_replay_and_grants_nothing() {
        let now = 1_700_000_000;
        let mut engine = engine(now);
        let packet = codec::encode(b"supersecret", [3u8; 16], now, None, &[PortSpec::new(Protocol::Tcp, 22)], None);
        assert_eq!(engine.authorize(candidate_with_payload(packet.clone())).len(), 1);
        assert!(engine.authorize(candidate_with_payload(packet)).is_empty());
    }

    #[test]
    fn policy_deny_still_recorded_the_digest() {
        let now = 1_700_000_000;
        let mut engine = engine(now);
        let packet = codec::encode(b"supersecret", [4u8; 16], now, None, &[PortSpec::new(Protocol::Tcp, 23)], None);
        assert!(engine.authorize(candidate_with_payload(packet.clone())).is_empty());
        assert_eq!(engine.replay_len(), 1);
        // retransmission is now a replay, not a fresh policy-deny decode
        assert!(engine.authorize(candidate_with_payload(packet)).is_empty());
        assert_eq!(engine.replay_len(), 1);
    }

    #[test]
    fn hmac_failure_drops_without_touching_replay_cache() {
        let now = 1_700_000_000;
        let mut engine = engine(now);
        let packet = codec::encode(b"wrong-key", [5u8; 16], now, None, &[PortSpec::new(Protocol::Tcp, 22)], None);
        assert!(engine.authorize(candidate_with_payload(packet)).is_empty());
        assert_eq!(engine.replay_len(), 0);
    }
}
