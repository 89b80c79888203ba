//! The `FwBackend` trait boundary and the reference `iptables` backend.
//!
//! [`FwBackend`] is the extension point for other packet filters, e.g.
//! `ipfw`/`pf`: anything that can turn a [`ChainBinding`] and a grant into
//! an argv vector and parse a listing back into [`ListedRule`]s plugs in
//! here. [`IptablesBackend`] is the one concrete implementation this crate
//! ships.

use std::ffi::OsString;
use std::time::Duration;

use crate::chain::{ChainBinding, Direction, GrantSpec, ListedRule, expiry_comment, parse_expiry_comment};
use crate::runner::{RunnerError, SubprocessRunner, argv};

/// Failure composing or executing a firewall-backend command.
#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    /// The subprocess runner failed to execute or timed out.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// The command executed but exited non-zero.
    #[error("`{command}` exited with status {status:?}: {stderr}")]
    NonZeroExit {
        /// The command line that failed, for logging.
        command: String,
        /// The process's exit status, if any.
        status: Option<i32>,
        /// Captured stderr, trimmed for the error message.
        stderr: String,
    },
    /// A chain listing could not be parsed into rule entries.
    #[error("failed to parse rule listing for chain {chain}: {reason}")]
    ListingParse {
        /// The chain whose listing failed to parse.
        chain: String,
        /// Description of what went wrong.
        reason: String,
    },
}

/// Turns chain-topology and grant operations into subprocess invocations
/// against a specific external packet filter.
pub trait FwBackend {
    /// Flushes and deletes `binding.to_chain`, if it exists. Idempotent:
    /// a chain that does not exist is not an error.
    fn delete_chain(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError>;

    /// Creates `binding.to_chain`.
    fn create_chain(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError>;

    /// Lists `binding.from_chain` and returns the rule number of a jump to
    /// `binding.to_chain`, or `None` if absent.
    fn find_jump(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<Option<u32>, FirewallError>;

    /// Inserts a jump from `binding.from_chain` to `binding.to_chain` at
    /// `binding.jump_position`.
    fn insert_jump(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError>;

    /// Deletes the rule at `position` in `binding.from_chain` (used to
    /// remove the jump at shutdown).
    fn delete_from_chain_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        position: u32,
    ) -> Result<(), FirewallError>;

    /// Lists `binding.to_chain` and returns every rule with its parsed
    /// expiry, in ascending rule-number order.
    fn list_rules(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<Vec<ListedRule>, FirewallError>;

    /// Inserts a grant rule into `binding.to_chain` at
    /// `binding.initial_rule_position`, carrying the `_exp_` comment.
    fn insert_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        grant: &GrantSpec,
    ) -> Result<(), FirewallError>;

    /// Deletes the rule at `position` in `binding.to_chain`.
    fn delete_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        position: u32,
    ) -> Result<(), FirewallError>;
}

/// The reference `iptables`-shaped backend. Works equally for `ip6tables`
/// by constructing it with that binary name, since the argv grammar is
/// identical.
#[derive(Debug, Clone)]
pub struct IptablesBackend {
    binary: String,
    timeout: Duration,
}

impl IptablesBackend {
    /// Constructs a backend invoking `binary` (e.g. `"iptables"`) with the
    /// given per-command timeout.
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn run(
        &self,
        runner: &mut dyn SubprocessRunner,
        args: Vec<OsString>,
    ) -> Result<crate::runner::CommandOutput, FirewallError> {
        let mut full = vec![OsString::from(&self.binary)];
        full.extend(args);
        let output = runner.run(&full, self.timeout)?;
        if !output.success() {
            return Err(FirewallError::NonZeroExit {
                command: crate::runner::display_argv(&full),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn direction_args(direction: Direction, src_ip: std::net::IpAddr) -> Vec<OsString> {
        let ip = src_ip.to_string();
        match direction {
            Direction::Src => argv(["-s", &ip]),
            Direction::Dst => argv(["-d", &ip]),
            Direction::Both => argv(["-s", &ip, "-d", &ip]),
        }
    }
}

impl FwBackend for IptablesBackend {
    fn delete_chain(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError> {
        // Idempotent cleanup of a previous run: a missing chain is not an
        // error, so flush/delete failures are logged and swallowed here
        // rather than propagated.
        let flush = self.run(
            runner,
            argv(["-t", binding.table.as_str(), "-F", binding.to_chain.as_str()]),
        );
        if let Err(error) = flush {
            tracing::debug!(chain = %binding.to_chain, %error, "flush of daemon chain failed (likely absent)");
        }
        let delete = self.run(
            runner,
            argv(["-t", binding.table.as_str(), "-X", binding.to_chain.as_str()]),
        );
        if let Err(error) = delete {
            tracing::debug!(chain = %binding.to_chain, %error, "delete of daemon chain failed (likely absent)");
        }
        Ok(())
    }

    fn create_chain(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError> {
        self.run(
            runner,
            argv(["-t", binding.table.as_str(), "-N", binding.to_chain.as_str()]),
        )
        .map(|_| ())
    }

    fn find_jump(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<Option<u32>, FirewallError> {
        let output = self.run(
            runner,
            argv([
                "-t",
                binding.table.as_str(),
                "-L",
                binding.from_chain.as_str(),
                "--line-numbers",
                "-n",
            ]),
        )?;
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines().skip(2) {
            let mut fields = line.split_whitespace();
            let Some(number_str) = fields.next() else { continue };
            let Ok(number) = number_str.parse::<u32>() else { continue };
            if fields.next() == Some(binding.to_chain.as_str()) {
                return Ok(Some(number));
            }
        }
        Ok(None)
    }

    fn insert_jump(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<(), FirewallError> {
        self.run(
            runner,
            argv([
                "-t",
                binding.table.as_str(),
                "-I",
                binding.from_chain.as_str(),
                &binding.jump_position.to_string(),
                "-j",
                binding.to_chain.as_str(),
            ]),
        )
        .map(|_| ())
    }

    fn delete_from_chain_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        position: u32,
    ) -> Result<(), FirewallError> {
        self.run(
            runner,
            argv([
                "-t",
                binding.table.as_str(),
                "-D",
                binding.from_chain.as_str(),
                &position.to_string(),
            ]),
        )
        .map(|_| ())
    }

    fn list_rules(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
    ) -> Result<Vec<ListedRule>, FirewallError> {
        let output = self.run(
            runner,
            argv([
                "-t",
                binding.table.as_str(),
                "-L",
                binding.to_chain.as_str(),
                "--line-numbers",
                "-n",
            ]),
        )?;
        let text = String::from_utf8_lossy(&output.stdout);
        let mut rules = Vec::new();
        for line in text.lines().skip(2) {
            if line.trim().is_empty() {
                continue;
            }
            let number_str = line
                .split_whitespace()
                .next()
                .ok_or_else(|| FirewallError::ListingParse {
                    chain: binding.to_chain.clone(),
                    reason: format!("no rule number in line `{line}`"),
                })?;
            let number: u32 = number_str.parse().map_err(|_| FirewallError::ListingParse {
                chain: binding.to_chain.clone(),
                reason: format!("non-numeric rule number `{number_str}`"),
            })?;
            rules.push(ListedRule {
                number,
                expiry: parse_expiry_comment(line),
            });
        }
        Ok(rules)
    }

    fn insert_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        grant: &GrantSpec,
    ) -> Result<(), FirewallError> {
        let mut args = argv([
            "-t",
            binding.table.as_str(),
            "-I",
            binding.to_chain.as_str(),
            &binding.initial_rule_position.to_string(),
            "-p",
            grant.proto.as_str(),
        ]);
        args.extend(Self::direction_args(binding.direction, grant.src_ip));
        args.extend(argv(["--dport", &grant.dst_port.to_string()]));
        args.extend(argv(["-j", binding.target_verdict.as_str()]));
        args.extend(argv(["-m", "comment", "--comment", &expiry_comment(grant.expiry)]));
        self.run(runner, args).map(|_| ())
    }

    fn delete_rule(
        &self,
        runner: &mut dyn SubprocessRunner,
        binding: &ChainBinding,
        position: u32,
    ) -> Result<(), FirewallError> {
        self.run(
            runner,
            argv([
                "-t",
                binding.table.as_str(),
                "-D",
                binding.to_chain.as_str(),
                &position.to_string(),
            ]),
        )
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use core::proto::Protocol;

    fn binding() -> ChainBinding {
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

    #[test]
    fn find_jump_parses_the_target_column() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        runner.push_stdout(
            "Chain INPUT (policy ACCEPT)\nnum  target     prot opt source  destination\n1    SPA_INPUT  all  --  0.0.0.0/0  0.0.0.0/0\n",
        );
        let position = backend.find_jump(&mut runner, &binding()).unwrap();
        assert_eq!(position, Some(1));
    }

    #[test]
    fn find_jump_returns_none_when_absent() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        runner.push_stdout("Chain INPUT (policy ACCEPT)\nnum  target  prot opt source  destination\n");
        let position = backend.find_jump(&mut runner, &binding()).unwrap();
        assert_eq!(position, None);
    }

    #[test]
    fn list_rules_parses_expiry_comments() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        runner.push_stdout(
            "Chain SPA_INPUT (1 references)\nnum  target  prot opt source       destination\n1    ACCEPT  tcp  --  10.1.2.3     0.0.0.0/0   tcp dpt:22 /* _exp_1700000030 */\n2    ACCEPT  tcp  --  10.1.2.4     0.0.0.0/0   tcp dpt:23\n",
        );
        let rules = backend.list_rules(&mut runner, &binding()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].expiry, Some(1_700_000_030));
        assert_eq!(rules[1].expiry, None);
    }

    #[test]
    fn insert_rule_composes_expected_argv() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        let grant = GrantSpec {
            proto: Protocol::Tcp,
            src_ip: "10.1.2.3".parse().unwrap(),
            dst_port: 22,
            expiry: 1_700_000_030,
        };
        backend.insert_rule(&mut runner, &binding(), &grant).unwrap();
        let call = &runner.calls[0];
        let joined = crate::runner::display_argv(call);
        assert!(joined.contains("-s 10.1.2.3"));
        assert!(joined.contains("--dport 22"));
        assert!(joined.contains("_exp_1700000030"));
        assert!(joined.contains("-j ACCEPT"));
    }

    #[test]
    fn non_zero_exit_surfaces_as_error() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        runner.push_output(crate::runner::CommandOutput {
            status: Some(1),
            stdout: Vec::new(),
            stderr: b"Chain already exists".to_vec(),
        });
        let result = backend.create_chain(&mut runner, &binding());
        assert!(matches!(result, Err(FirewallError::NonZeroExit { .. })));
    }

    #[test]
    fn delete_chain_is_idempotent_even_when_commands_fail() {
        let backend = IptablesBackend::new("iptables", Duration::from_secs(1));
        let mut runner = RecordingRunner::new();
        runner.push_output(crate::runner::CommandOutput {
            status: Some(1),
            stdout: Vec::new(),
            stderr: b"No chain/target/match by that name".to_vec(),
        });
        runner.push_output(crate::runner::CommandOutput {
            status: Some(1),
            stdout: Vec::new(),
            stderr: b"No chain/target/match by that name".to_vec(),
        });
        assert!(backend.delete_chain(&mut runner, &binding()).is_ok());
    }
}
