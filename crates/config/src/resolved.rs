//! The fully merged configuration view: defaults, main file, override
//! fragments, and CLI flags, collapsed into one struct.

use std::path::PathBuf;

use firewall::ChainBinding;

use crate::chain::parse_chain_bindings;
use crate::main_config::RawConfig;
use crate::ConfigError;

/// Which [`replay`]-crate back-end the daemon constructs at startup.
///
/// (Named here rather than depending on the `replay` crate directly, to
/// keep `config` below `replay` in the dependency graph; the daemon crate
/// matches on this to pick a concrete back-end.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayBackendKind {
    /// The append-only file-backed store.
    File,
    /// The in-process concurrent-map store.
    Indexed,
}

/// CLI-flag overrides layered on top of file-sourced configuration. Every
/// field always wins over the file value when present, per the resolution
/// order in the configuration loader's design.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `-a`: access policy file path.
    pub access_file: Option<PathBuf>,
    /// `-i`: capture interface.
    pub interface: Option<String>,
    /// `-P`: capture filter expression.
    pub capture_filter: Option<String>,
    /// `--gpg-home-dir`.
    pub gpg_home_dir: Option<PathBuf>,
    /// `-l`: locale override.
    pub locale: Option<String>,
    /// `-f`: run in the foreground.
    pub foreground: bool,
    /// `-v` count.
    pub verbosity: u8,
    /// `-C <n>`: stop after `n` candidate packets.
    pub packet_limit: Option<u64>,
}

/// The fully merged view every component is constructed from, and the
/// structure `dump-config` prints.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to the access policy file.
    pub access_file: PathBuf,
    /// Path to the PID file.
    pub pid_file: PathBuf,
    /// Path to the external packet-filter binary (e.g. `iptables`).
    pub fw_binary: PathBuf,
    /// Wall-clock timeout for a single firewall subprocess invocation.
    pub fw_timeout_secs: u64,
    /// Cadence of the expiry-reaping tick.
    pub reap_interval_secs: u64,
    /// Default access-grant timeout when a request does not specify one.
    pub default_timeout_secs: u32,
    /// Acceptable clock skew for the embedded SPA timestamp.
    pub skew_window_secs: u64,
    /// Per-frame payload truncation limit.
    pub sniff_bytes: usize,
    /// Path to the replay-digest cache file (used by either back-end for
    /// its on-disk identity, even the in-memory one, for `--rotate-digest-cache`).
    pub replay_cache_path: PathBuf,
    /// Which replay back-end to construct.
    pub replay_backend: ReplayBackendKind,
    /// Capture interface name, if any (absent means "first available" or
    /// platform default, resolved by the capture back-end).
    pub interface: Option<String>,
    /// Capture filter expression, if any.
    pub capture_filter: Option<String>,
    /// GPG home directory override, stored but not used by the reference
    /// codec (GPG itself is out of scope).
    pub gpg_home_dir: Option<PathBuf>,
    /// Locale override.
    pub locale: Option<String>,
    /// Run in the foreground instead of daemonizing.
    pub foreground: bool,
    /// Cumulative verbosity (`-v` count).
    pub verbosity: u8,
    /// Optional bound on the number of candidate packets to process before
    /// a graceful shutdown (`-C`).
    pub packet_limit: Option<u64>,
    /// Configured firewall chain bindings, in definition order.
    pub chain_bindings: Vec<ChainBinding>,
}

impl ResolvedConfig {
    /// Resolves a main config file, a sequence of override fragments
    /// (applied strictly in the given order, last write wins), and CLI
    /// overrides (which always win over file-sourced values) into one
    /// [`ResolvedConfig`].
    pub fn resolve(
        main_path: &std::path::Path,
        override_paths: &[PathBuf],
        cli: &CliOverrides,
    ) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::load(main_path)?;
        for fragment_path in override_paths {
            let fragment = RawConfig::load(fragment_path)?;
            raw.merge(fragment);
        }

        let access_file = cli
            .access_file
            .clone()
            .or_else(|| raw.get("ACCESS_FILE").map(PathBuf::from))
            .ok_or_else(|| ConfigError::Invalid("no ACCESS_FILE configured (set in config or pass -a)".to_string()))?;

        let pid_file = raw
            .get("PID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| core::version::default_pid_path().to_path_buf());

        let fw_binary = raw
            .get("FW_BIN")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Invalid("no FW_BIN configured (path to the firewall binary)".to_string()))?;

        let fw_timeout_secs = parse_u64_or(&raw, "FW_TIMEOUT", 30)?;
        let reap_interval_secs = parse_u64_or(&raw, "REAP_INTERVAL", 10)?;
        let default_timeout_secs = parse_u32_or(&raw, "DEFAULT_TIMEOUT", 30)?;
        let skew_window_secs = parse_u64_or(&raw, "SKEW_WINDOW", 120)?;
        let sniff_bytes = parse_usize_or(&raw, "MAX_SNIFF_BYTES", 1500)?;

        let replay_cache_path = raw
            .get("REPLAY_CACHE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| core::version::default_digest_cache_path().to_path_buf());

        let replay_backend = match raw.get("REPLAY_BACKEND").unwrap_or("file").to_ascii_lowercase().as_str() {
            "file" => ReplayBackendKind::File,
            "indexed" => ReplayBackendKind::Indexed,
            other => {
                return Err(ConfigError::Invalid(format!(
                    "REPLAY_BACKEND must be `file` or `indexed`, got `{other}`"
                )));
            }
        };

        let chain_bindings = parse_chain_bindings(&raw)?;
        if chain_bindings.is_empty() {
            return Err(ConfigError::Invalid(
                "no FW_CHAIN_<kind> bindings configured; at least one chain is required".to_string(),
            ));
        }

        Ok(Self {
            access_file,
            pid_file,
            fw_binary,
            fw_timeout_secs,
            reap_interval_secs,
            default_timeout_secs,
            skew_window_secs,
            sniff_bytes,
            replay_cache_path,
            replay_backend,
            interface: cli.interface.clone().or_else(|| raw.get("PCAP_INTF").map(str::to_string)),
            capture_filter: cli.capture_filter.clone().or_else(|| raw.get("PCAP_FILTER").map(str::to_string)),
            gpg_home_dir: cli.gpg_home_dir.clone().or_else(|| raw.get("GPG_HOME_DIR").map(PathBuf::from)),
            locale: cli.locale.clone().or_else(|| raw.get("LOCALE").map(str::to_string)),
            foreground: cli.foreground,
            verbosity: cli.verbosity,
            packet_limit: cli.packet_limit,
            chain_bindings,
        })
    }
}

fn parse_u64_or(raw: &RawConfig, key: &str, default: u64) -> Result<u64, ConfigError> {
    match raw.get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid(format!("{key}: invalid integer `{value}`"))),
        None => Ok(default),
    }
}

fn parse_u32_or(raw: &RawConfig, key: &str, default: u32) -> Result<u32, ConfigError> {
    match raw.get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid(format!("{key}: invalid integer `{value}`"))),
        None => Ok(default),
    }
}

fn parse_usize_or(raw: &RawConfig, key: &str, default: usize) -> Result<usize, ConfigError> {
    match raw.get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid(format!("{key}: invalid integer `{value}`"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = "\
ACCESS_FILE /etc/spa-authd/access.conf
FW_BIN /sbin/iptables
FW_CHAIN_INPUT filter INPUT 1 SPA_INPUT 1 src ACCEPT
";

    #[test]
    fn resolves_required_fields_and_defaults() {
        let main = write_temp(MINIMAL);
        let resolved = ResolvedConfig::resolve(main.path(), &[], &CliOverrides::default()).unwrap();
        assert_eq!(resolved.access_file, PathBuf::from("/etc/spa-authd/access.conf"));
        assert_eq!(resolved.fw_timeout_secs, 30);
        assert_eq!(resolved.chain_bindings.len(), 1);
        assert_eq!(resolved.replay_backend, ReplayBackendKind::File);
    }

    #[test]
    fn missing_access_file_and_no_cli_override_is_an_error() {
        let main = write_temp("FW_BIN /sbin/iptables\nFW_CHAIN_INPUT filter INPUT 1 SPA_INPUT 1 src ACCEPT\n");
        let result = ResolvedConfig::resolve(main.path(), &[], &CliOverrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn missing_chain_bindings_is_an_error() {
        let main = write_temp("ACCESS_FILE /etc/spa-authd/access.conf\nFW_BIN /sbin/iptables\n");
        let result = ResolvedConfig::resolve(main.path(), &[], &CliOverrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn override_fragments_apply_in_order_last_write_wins() {
        let main = write_temp(MINIMAL);
        let fragment_a = write_temp("FW_TIMEOUT 5\n");
        let fragment_b = write_temp("FW_TIMEOUT 15\n");
        let resolved = ResolvedConfig::resolve(
            main.path(),
            &[fragment_a.path().to_path_buf(), fragment_b.path().to_path_buf()],
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(resolved.fw_timeout_secs, 15);
    }

    #[test]
    fn cli_override_always_wins_over_file_value() {
        let main = write_temp(MINIMAL);
        let cli = CliOverrides {
            access_file: Some(PathBuf::from("/tmp/other-access.conf")),
            ..CliOverrides::default()
        };
        let resolved = ResolvedConfig::resolve(main.path(), &[], &cli).unwrap();
        assert_eq!(resolved.access_file, PathBuf::from("/tmp/other-access.conf"));
    }
}
