//! The firewall driver: chain topology lifecycle, rule installation, and
//! expiry reaping.

use std::collections::HashMap;

use crate::backend::{FirewallError, FwBackend};
use crate::chain::{ChainBinding, GrantSpec, PerChainCounter};
use crate::runner::SubprocessRunner;

/// Report of one [`FirewallDriver::reap`] pass, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Number of delete commands issued during this pass.
    pub deleted: u64,
    /// Number of rules found to have lost their `_exp_` comment (external
    /// interference).
    pub externally_removed: u64,
    /// Whether the pass was skipped entirely because the counter's
    /// `reap_is_unnecessary` hint held.
    pub skipped: bool,
}

/// Owns the set of configured [`ChainBinding`]s and their
/// [`PerChainCounter`] bookkeeping, and orchestrates a [`FwBackend`]
/// through a [`SubprocessRunner`] to realize chain topology, grant
/// installation, and expiry reaping.
///
/// Explicitly owned and threaded through the control plane rather than
/// held as process-wide mutable state, so tests can construct their own
/// instance freely.
pub struct FirewallDriver<B> {
    backend: B,
    bindings: Vec<ChainBinding>,
    counters: HashMap<String, PerChainCounter>,
}

impl<B: FwBackend> FirewallDriver<B> {
    /// Constructs a driver over `backend` with `bindings` in configuration
    /// order. Iteration order is preserved exactly as given.
    #[must_use]
    pub fn new(backend: B, bindings: Vec<ChainBinding>) -> Self {
        let counters = bindings
            .iter()
            .map(|b| (b.kind.clone(), PerChainCounter::default()))
            .collect();
        Self {
            backend,
            bindings,
            counters,
        }
    }

    /// Returns the configured bindings, in definition order.
    #[must_use]
    pub fn bindings(&self) -> &[ChainBinding] {
        &self.bindings
    }

    /// Returns the current counter for a chain kind, if configured.
    #[must_use]
    pub fn counter(&self, kind: &str) -> Option<PerChainCounter> {
        self.counters.get(kind).copied()
    }

    /// Initializes every configured chain: idempotently tears down a
    /// stale daemon chain from a previous run, creates a fresh one, and
    /// ensures the jump from the host chain is present.
    pub fn init_chains(&mut self, runner: &mut dyn SubprocessRunner) -> Result<(), FirewallError> {
        for binding in &self.bindings {
            self.backend.delete_chain(runner, binding)?;
            self.backend.create_chain(runner, binding)?;
            if self.backend.find_jump(runner, binding)?.is_none() {
                self.backend.insert_jump(runner, binding)?;
            }
        }
        for counter in self.counters.values_mut() {
            *counter = PerChainCounter::default();
        }
        Ok(())
    }

    /// Tears down every configured chain: removes the jump from the host
    /// chain (if present) and deletes the daemon-owned chain.
    pub fn teardown_chains(&mut self, runner: &mut dyn SubprocessRunner) -> Result<(), FirewallError> {
        for binding in &self.bindings {
            if let Some(position) = self.backend.find_jump(runner, binding)? {
                self.backend.delete_from_chain_rule(runner, binding, position)?;
            }
            self.backend.delete_chain(runner, binding)?;
        }
        Ok(())
    }

    /// Installs one grant rule into the chain named `kind`.
    pub fn install_grant(
        &mut self,
        runner: &mut dyn SubprocessRunner,
        kind: &str,
        grant: &GrantSpec,
    ) -> Result<(), FirewallError> {
        let binding = self.binding(kind)?;
        self.backend.insert_rule(runner, binding, grant)?;
        self.counters.entry(kind.to_string()).or_default().record_install(grant.expiry);
        Ok(())
    }

    /// Reaps expired rules from the chain named `kind`. A no-op, reported
    /// via [`ReapReport::skipped`], when the per-chain counter indicates
    /// nothing can possibly be due.
    ///
    /// Rule numbers shift after every deletion; this tracks a running
    /// offset against the original listing in a single pass rather than
    /// re-listing after each delete. `active_rules`/`next_expiry` are
    /// recomputed directly from
    /// the surviving listing at the end of the pass rather than
    /// incrementally decremented, which folds the "external interference"
    /// case (a rule missing its `_exp_` comment) and the reaped case into
    /// one recomputation and can never leave the counter in a state
    /// inconsistent with what was actually listed.
    pub fn reap(
        &mut self,
        runner: &mut dyn SubprocessRunner,
        kind: &str,
        now: u64,
    ) -> Result<ReapReport, FirewallError> {
        let counter = *self
            .counters
            .get(kind)
            .ok_or_else(|| FirewallError::ListingParse {
                chain: kind.to_string(),
                reason: "no such configured chain".to_string(),
            })?;
        if counter.reap_is_unnecessary(now) {
            return Ok(ReapReport {
                skipped: true,
                ..ReapReport::default()
            });
        }

        let binding = self.binding(kind)?.clone();
        let rules = self.backend.list_rules(runner, &binding)?;

        let mut offset: u32 = 0;
        let mut deleted = 0u64;
        let mut externally_removed = 0u64;
        let mut survivors = 0u64;
        let mut next_expiry = None;

        for rule in rules {
            match rule.expiry {
                None => {
                    tracing::warn!(chain = %binding.to_chain, rule = rule.number, "rule lost its _exp_ comment; assuming external interference");
                    externally_removed += 1;
                }
                Some(expiry) if expiry <= now => {
                    let adjusted = rule.number - offset;
                    self.backend.delete_rule(runner, &binding, adjusted)?;
                    offset += 1;
                    deleted += 1;
                }
                Some(expiry) => {
                    survivors += 1;
                    next_expiry = Some(next_expiry.map_or(expiry, |current: u64| current.min(expiry)));
                }
            }
        }

        if let Some(entry) = self.counters.get_mut(kind) {
            entry.active_rules = survivors;
            entry.next_expiry = next_expiry;
        }

        Ok(ReapReport {
            deleted,
            externally_removed,
            skipped: false,
        })
    }

    /// Lists the currently-installed rules in the chain named `kind`, for
    /// the `fw-list` admin verb.
    pub fn list_rules(
        &self,
        runner: &mut dyn SubprocessRunner,
        kind: &str,
    ) -> Result<Vec<crate::chain::ListedRule>, FirewallError> {
        let binding = self.binding(kind)?;
        self.backend.list_rules(runner, binding)
    }

    fn binding(&self, kind: &str) -> Result<&ChainBinding, FirewallError> {
        self.bindings
            .iter()
            .find(|b| b.kind == kind)
            .ok_or_else(|| FirewallError::ListingParse {
                chain: kind.to_string(),
                reason: "no such configured chain".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::IptablesBackend;
    use crate::chain::Direction;
    use crate::runner::RecordingRunner;
    use core::proto::Protocol;
    use std::time::Duration;

    fn test_binding() -> ChainBinding {
        ChainBinding {
            kind: "input".to_string(),
            target_verdict: "ACCEPT".to_string(),
            direction: Direction::Src,
            table: "filter".to_string(),
            from_chain: "INPUT".to_string(),
            jump_position: 1,
            to_chain: "SPA_INPUT".to_string(),
            initial_rule_position: 1,
        }
    }

    fn driver() -> FirewallDriver<IptablesBackend> {
        FirewallDriver::new(
            IptablesBackend::new("iptables", Duration::from_secs(1)),
            vec![test_binding()],
        )
    }

    #[test]
    fn init_chains_creates_chain_and_inserts_missing_jump() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();
        // delete_chain: flush then delete (both may fail harmlessly)
        runner.push_stdout("");
        runner.push_stdout("");
        // create_chain
        runner.push_stdout("");
        // find_jump: no existing jump
        runner.push_stdout("Chain INPUT (policy ACCEPT)\nnum  target  prot opt source  destination\n");
        // insert_jump
        runner.push_stdout("");

        driver.init_chains(&mut runner).unwrap();
        assert_eq!(runner.calls.len(), 5);
        assert!(crate::runner::display_argv(&runner.calls[4]).contains("-I INPUT 1 -j SPA_INPUT"));
    }

    #[test]
    fn init_chains_skips_jump_insertion_when_already_present() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();
        runner.push_stdout("");
        runner.push_stdout("");
        runner.push_stdout("");
        runner.push_stdout("Chain INPUT (policy ACCEPT)\nnum  target     prot opt source  destination\n1    SPA_INPUT  all  --  0.0.0.0/0  0.0.0.0/0\n");

        driver.init_chains(&mut runner).unwrap();
        assert_eq!(runner.calls.len(), 4);
    }

    #[test]
    fn install_grant_increments_active_rules_and_next_expiry() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();
        runner.push_stdout("");
        let grant = GrantSpec {
            proto: Protocol::Tcp,
            src_ip: "10.1.2.3".parse().unwrap(),
            dst_port: 22,
            expiry: 1_700_000_030,
        };
        driver.install_grant(&mut runner, "input", &grant).unwrap();
        let counter = driver.counter("input").unwrap();
        assert_eq!(counter.active_rules, 1);
        assert_eq!(counter.next_expiry, Some(1_700_000_030));
    }

    #[test]
    fn reap_is_skipped_when_no_rules_are_active() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();
        let report = driver.reap(&mut runner, "input", 1_700_000_000).unwrap();
        assert!(report.skipped);
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn reap_deletes_expired_rules_accounting_for_rule_number_shift() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();

        // install three grants: two expired by `now`, one not.
        runner.push_stdout("");
        runner.push_stdout("");
        runner.push_stdout("");
        driver
            .install_grant(
                &mut runner,
                "input",
                &GrantSpec { proto: Protocol::Tcp, src_ip: "10.0.0.1".parse().unwrap(), dst_port: 22, expiry: 100 },
            )
            .unwrap();
        driver
            .install_grant(
                &mut runner,
                "input",
                &GrantSpec { proto: Protocol::Tcp, src_ip: "10.0.0.2".parse().unwrap(), dst_port: 22, expiry: 200 },
            )
            .unwrap();
        driver
            .install_grant(
                &mut runner,
                "input",
                &GrantSpec { proto: Protocol::Tcp, src_ip: "10.0.0.3".parse().unwrap(), dst_port: 22, expiry: 9_999 },
            )
            .unwrap();

        // listing shows all 3 rules, numbered 1..3, first two expired at now=300
        runner.push_stdout(
            "Chain SPA_INPUT (1 references)\nnum  target  prot opt source      destination\n\
             1    ACCEPT  tcp  --  10.0.0.1    0.0.0.0/0  tcp dpt:22 /* _exp_100 */\n\
             2    ACCEPT  tcp  --  10.0.0.2    0.0.0.0/0  tcp dpt:22 /* _exp_200 */\n\
             3    ACCEPT  tcp  --  10.0.0.3    0.0.0.0/0  tcp dpt:22 /* _exp_9999 */\n",
        );
        // two delete calls
        runner.push_stdout("");
        runner.push_stdout("");

        let report = driver.reap(&mut runner, "input", 300).unwrap();
        assert_eq!(report.deleted, 2);
        assert!(!report.skipped);

        let delete_calls: Vec<_> = runner.calls[4..].to_vec();
        assert_eq!(delete_calls.len(), 3); // 1 list + 2 deletes after the 3 installs
        let first_delete = crate::runner::display_argv(&delete_calls[1]);
        let second_delete = crate::runner::display_argv(&delete_calls[2]);
        assert!(first_delete.contains("-D SPA_INPUT 1"));
        // rule 2 shifts down to position 1 after rule 1 is deleted
        assert!(second_delete.contains("-D SPA_INPUT 1"));

        let counter = driver.counter("input").unwrap();
        assert_eq!(counter.active_rules, 1);
        assert_eq!(counter.next_expiry, Some(9_999));
    }

    #[test]
    fn reap_treats_missing_exp_comment_as_external_interference() {
        let mut driver = driver();
        let mut runner = RecordingRunner::new();
        runner.push_stdout("");
        driver
            .install_grant(
                &mut runner,
                "input",
                &GrantSpec { proto: Protocol::Tcp, src_ip: "10.0.0.1".parse().unwrap(), dst_port: 22, expiry: 100 },
            )
            .unwrap();

        runner.push_stdout(
            "Chain SPA_INPUT (1 references)\nnum  target  prot opt source      destination\n\
             1    ACCEPT  tcp  --  10.0.0.1    0.0.0.0/0  tcp dpt:22\n",
        );

        let report = driver.reap(&mut runner, "input", 500).unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.externally_removed, 1);
        let counter = driver.counter("input").unwrap();
        assert_eq!(counter.active_rules, 0);
    }
}
