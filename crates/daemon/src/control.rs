//! The control plane: pidfile ownership, signal handling, the periodic
//! expiry tick, the main event loop, and the admin verbs that don't need a
//! running daemon (`kill`, `status`, `fw-list`, `dump-config`,
//! `rotate-digest-cache`).

use std::time::Duration;

use capture::{CaptureAdaptor, CaptureOutcome, FrameSource};
use config::{ReplayBackendKind, ResolvedConfig};
use firewall::{ChainBinding, FirewallDriver, GrantSpec, IptablesBackend, ListedRule, ProcessRunner};
use platform::{PidFile, Signal, Signals};
use replay::ReplayStore;

use crate::engine::AuthorizationEngine;
use crate::DaemonError;

/// The outcome of [`status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// A pidfile names a live process.
    Running {
        /// The running process's PID.
        pid: i32,
    },
    /// A pidfile exists but names a process that is no longer alive.
    StalePidfile {
        /// The dead process's recorded PID.
        pid: i32,
    },
    /// No pidfile is present.
    NotRunning,
}

/// Reads the pidfile and reports whether the recorded process is alive,
/// without acquiring the lock. Used by the `status` admin verb.
#[must_use]
pub fn status(config: &ResolvedConfig) -> DaemonStatus {
    match PidFile::read_pid(&config.pid_file) {
        Ok(pid) if platform::pidfile::is_process_alive(pid) => DaemonStatus::Running { pid },
        Ok(pid) => DaemonStatus::StalePidfile { pid },
        Err(_) => DaemonStatus::NotRunning,
    }
}

/// Sends `SIGTERM` to the process named by the pidfile. Used by the `kill`
/// admin verb; `restart` calls this then starts a fresh control plane.
pub fn kill(config: &ResolvedConfig) -> Result<(), DaemonError> {
    let pid = PidFile::read_pid(&config.pid_file)?;
    send_sigterm(pid)
}

#[cfg(unix)]
fn send_sigterm(pid: i32) -> Result<(), DaemonError> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), NixSignal::SIGTERM)
        .map_err(|source| DaemonError::Signal(format!("failed to signal pid {pid}: {source}")))
}

#[cfg(not(unix))]
fn send_sigterm(_pid: i32) -> Result<(), DaemonError> {
    Err(DaemonError::Signal("signal delivery is only supported on unix".to_string()))
}

/// Lists every configured chain's currently-installed rules. Used by the
/// `fw-list` admin verb, which runs as a one-shot command against the live
/// external filter state rather than the running daemon process.
pub fn fw_list(config: &ResolvedConfig) -> Result<Vec<(String, Vec<ListedRule>)>, DaemonError> {
    let backend = IptablesBackend::new(config.fw_binary.to_string_lossy().into_owned(), Duration::from_secs(config.fw_timeout_secs));
    let mut driver = FirewallDriver::new(backend, config.chain_bindings.clone());
    let mut runner = ProcessRunner::new();
    let mut out = Vec::new();
    for binding in driver.bindings().to_vec() {
        let rules = driver.list_rules(&mut runner, &binding.kind)?;
        out.push((binding.kind, rules));
    }
    Ok(out)
}

/// Rotates the replay-digest cache, for the `rotate-digest-cache` admin
/// verb. The indexed back-end holds no durable file of its own, so this is
/// a no-op for it beyond logging.
pub fn rotate_digest_cache(config: &ResolvedConfig) -> Result<(), DaemonError> {
    match config.replay_backend {
        ReplayBackendKind::File => {
            let mut store = replay::FileStore::load_or_create(&config.replay_cache_path)?;
            store.rotate()?;
            Ok(())
        }
        ReplayBackendKind::Indexed => {
            tracing::info!("indexed replay backend holds no durable file; nothing to rotate");
            Ok(())
        }
    }
}

/// Owns the running daemon's mutable state: the authorization engine, the
/// capture adaptor, the firewall driver, the pidfile, and the registered
/// signal handlers. Threaded through explicitly rather than held as
/// process-wide state, so tests can construct their own instance.
pub struct ControlPlane<S, F> {
    config: ResolvedConfig,
    engine: AuthorizationEngine<S>,
    capture: CaptureAdaptor<F>,
    firewall: FirewallDriver<IptablesBackend>,
    runner: ProcessRunner,
    signals: Signals,
    pidfile: Option<PidFile>,
    next_reap_at: u64,
}

impl<S: ReplayStore, F: FrameSource> ControlPlane<S, F> {
    /// Constructs a control plane. Registers the process's signal handlers
    /// immediately; the pidfile is acquired in [`ControlPlane::run`].
    pub fn new(
        config: ResolvedConfig,
        engine: AuthorizationEngine<S>,
        capture: CaptureAdaptor<F>,
    ) -> Result<Self, DaemonError> {
        let backend = IptablesBackend::new(
            config.fw_binary.to_string_lossy().into_owned(),
            Duration::from_secs(config.fw_timeout_secs),
        );
        let firewall = FirewallDriver::new(backend, config.chain_bindings.clone());
        let signals = Signals::new()?;
        Ok(Self {
            config,
            engine,
            capture,
            firewall,
            runner: ProcessRunner::new(),
            signals,
            pidfile: None,
            next_reap_at: 0,
        })
    }

    /// Acquires the pidfile, initializes the firewall chain topology, and
    /// runs the single-threaded event loop until a terminate signal, a
    /// capture exhaustion, or the configured packet limit is reached, then
    /// performs graceful shutdown.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        self.pidfile = Some(PidFile::acquire(&self.config.pid_file)?);
        self.firewall.init_chains(&mut self.runner)?;
        self.next_reap_at = self.engine.clock().now_unix() + self.config.reap_interval_secs;

        let result = self.event_loop();

        if let Err(error) = self.firewall.teardown_chains(&mut self.runner) {
            tracing::warn!(%error, "failed to tear down firewall chains during shutdown");
        }
        if let Some(pidfile) = self.pidfile.take() {
            if let Err(error) = pidfile.release() {
                tracing::warn!(%error, "failed to release pidfile during shutdown");
            }
        }

        result
    }

    fn event_loop(&mut self) -> Result<(), DaemonError> {
        loop {
            if let Some(signal) = self.signals.poll() {
                match signal {
                    Signal::Terminate => {
                        tracing::info!("received termination signal; shutting down");
                        return Ok(());
                    }
                    Signal::Reload => self.reload(),
                }
            }

            match self.capture.next_candidate() {
                Some(CaptureOutcome::Candidate(candidate)) => {
                    let grants = self.engine.authorize(candidate);
                    self.install_grants(&grants);
                }
                Some(CaptureOutcome::Malformed(error)) => {
                    tracing::info!(%error, "malformed frame; dropping silently");
                }
                Some(CaptureOutcome::LimitReached) => {
                    tracing::info!("packet limit reached; shutting down");
                    return Ok(());
                }
                None => return Ok(()),
            }

            self.tick_reap();
        }
    }

    fn reload(&mut self) {
        match access::AccessPolicy::load(&self.config.access_file) {
            Ok(policy) => {
                self.engine.reload_policy(policy);
                tracing::info!("access policy reloaded");
            }
            Err(error) => {
                tracing::warn!(%error, "config reload failed to parse; keeping previous policy");
            }
        }
    }

    fn install_grants(&mut self, grants: &[core::Grant]) {
        let kinds: Vec<String> = self.firewall.bindings().iter().map(|b| b.kind.clone()).collect();
        for grant in grants {
            let spec = GrantSpec {
                proto: grant.port_spec.proto,
                src_ip: grant.src_ip,
                dst_port: grant.port_spec.port,
                expiry: grant.expiry,
            };
            for kind in &kinds {
                if let Err(error) = self.firewall.install_grant(&mut self.runner, kind, &spec) {
                    tracing::warn!(chain = %kind, %error, "failed to install grant rule");
                }
            }
        }
    }

    fn tick_reap(&mut self) {
        let now = self.engine.clock().now_unix();
        if now < self.next_reap_at {
            return;
        }
        let kinds: Vec<String> = self.firewall.bindings().iter().map(|b| b.kind.clone()).collect();
        for kind in &kinds {
            match self.firewall.reap(&mut self.runner, kind, now) {
                Ok(report) if !report.skipped => {
                    tracing::debug!(
                        chain = %kind,
                        deleted = report.deleted,
                        externally_removed = report.externally_removed,
                        "expiry reap complete"
                    );
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(chain = %kind, %error, "expiry reap failed"),
            }
        }
        self.next_reap_at = now + self.config.reap_interval_secs;
    }

    /// The configured chain bindings, for diagnostic tooling.
    #[must_use]
    pub fn chain_bindings(&self) -> &[ChainBinding] {
        self.firewall.bindings()
    }
}
