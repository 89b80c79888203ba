#![deny(unsafe_code)]

//! The `spa-authd` binary: parses argv with [`cli::Cli`], resolves the
//! admin verb, and either dispatches a one-shot control action or builds
//! and runs a [`daemon::ControlPlane`].

use std::path::PathBuf;
use std::process::ExitCode;

use capture::{CaptureAdaptor, InMemoryFrameSource};
use cli::{AdminVerb, Cli};
use config::{ReplayBackendKind, ResolvedConfig};
use daemon::{ControlPlane, DaemonError, DaemonStatus, EngineConfig};
use logging::{LogSink, StderrSink, SyslogSink};
use replay::{FileStore, IndexedStore};

const SYSLOG_IDENTITY: &str = "spa-authd";

fn main() -> ExitCode {
    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(error) => {
            eprint!("{error}");
            return ExitCode::from(2);
        }
    };

    let verb = match cli.resolve_verb() {
        Ok(verb) => verb,
        Err(error) => {
            eprintln!("spa-authd: {error}");
            return ExitCode::from(2);
        }
    };

    match verb {
        AdminVerb::Help => {
            println!("{}", cli_usage());
            ExitCode::SUCCESS
        }
        AdminVerb::Version => {
            println!("{}", core::version::banner());
            ExitCode::SUCCESS
        }
        _ => run(&cli, verb),
    }
}

fn cli_usage() -> String {
    use clap::CommandFactory;
    Cli::command().render_help().to_string()
}

fn run(cli: &Cli, verb: AdminVerb) -> ExitCode {
    let config_path = match cli.config_file() {
        Ok(path) => path.cloned().unwrap_or_else(|| core::version::default_config_path().to_path_buf()),
        Err(error) => {
            eprintln!("spa-authd: {error}");
            return ExitCode::from(2);
        }
    };

    let resolved = match resolve_config(&config_path, &cli.override_files, cli) {
        Ok(resolved) => resolved,
        Err(error) => {
            eprintln!("spa-authd: configuration error: {error}");
            return ExitCode::from(1);
        }
    };

    match verb {
        AdminVerb::DumpConfig => {
            println!("{resolved:#?}");
            ExitCode::SUCCESS
        }
        AdminVerb::Status => report_status(&resolved),
        AdminVerb::Kill => run_daemon_action(daemon::kill(&resolved)),
        AdminVerb::Restart => {
            if let Err(error) = daemon::kill(&resolved) {
                eprintln!("spa-authd: failed to signal running instance: {error}");
            }
            start(&resolved)
        }
        AdminVerb::FwList => report_fw_list(&resolved),
        AdminVerb::RotateDigestCache => run_daemon_action(daemon::rotate_digest_cache(&resolved)),
        AdminVerb::Start => start(&resolved),
        AdminVerb::Help | AdminVerb::Version => unreachable!("handled before config resolution"),
    }
}

fn resolve_config(path: &PathBuf, override_files: &[PathBuf], cli: &Cli) -> Result<ResolvedConfig, config::ConfigError> {
    let overrides = cli.overrides();
    ResolvedConfig::resolve(path, override_files, &overrides)
}

fn report_status(config: &ResolvedConfig) -> ExitCode {
    match daemon::status(config) {
        DaemonStatus::Running { pid } => {
            println!("running, pid {pid}");
            ExitCode::SUCCESS
        }
        DaemonStatus::StalePidfile { pid } => {
            println!("not running (stale pidfile names pid {pid})");
            ExitCode::from(1)
        }
        DaemonStatus::NotRunning => {
            println!("not running");
            ExitCode::from(1)
        }
    }
}

fn report_fw_list(config: &ResolvedConfig) -> ExitCode {
    match daemon::fw_list(config) {
        Ok(chains) => {
            for (kind, rules) in chains {
                println!("chain {kind}:");
                for rule in rules {
                    println!("  #{} expiry={:?}", rule.number, rule.expiry);
                }
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("spa-authd: fw-list failed: {error}");
            ExitCode::from(1)
        }
    }
}

fn run_daemon_action(result: Result<(), DaemonError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("spa-authd: {error}");
            ExitCode::from(1)
        }
    }
}

fn start(config: &ResolvedConfig) -> ExitCode {
    let sink = if config.foreground {
        LogSink::Stderr(StderrSink::default())
    } else {
        LogSink::Syslog(SyslogSink { also_stderr: false })
    };
    if let Err(error) = logging::install(sink, config.verbosity, SYSLOG_IDENTITY) {
        eprintln!("spa-authd: {error}");
        return ExitCode::from(1);
    }

    tracing::info!(version = core::version::PROGRAM_VERSION, "starting up");

    let policy = match access::AccessPolicy::load(&config.access_file) {
        Ok(policy) => policy,
        Err(error) => {
            tracing::error!(%error, "failed to load access policy");
            return ExitCode::from(1);
        }
    };

    let engine_config = EngineConfig {
        skew_window_secs: config.skew_window_secs,
        default_timeout_secs: config.default_timeout_secs,
    };

    // The packet capture driver is an external collaborator: production
    // deployments supply their own `FrameSource` implementor at this seam.
    // Absent one, the daemon still performs its full startup sequence
    // (pidfile, firewall chain setup, signal handling) over an empty
    // source, exiting cleanly once exhausted.
    let capture = CaptureAdaptor::new(InMemoryFrameSource::new(Vec::new()), config.sniff_bytes, config.packet_limit);

    let result = match config.replay_backend {
        ReplayBackendKind::File => {
            let store = match FileStore::load_or_create(&config.replay_cache_path) {
                Ok(store) => store,
                Err(error) => {
                    tracing::error!(%error, "failed to open replay cache");
                    return ExitCode::from(1);
                }
            };
            run_control_plane(config.clone(), policy, store, engine_config, capture)
        }
        ReplayBackendKind::Indexed => {
            run_control_plane(config.clone(), policy, IndexedStore::new(), engine_config, capture)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "daemon exited with an error");
            ExitCode::from(1)
        }
    }
}

fn run_control_plane<S: replay::ReplayStore>(
    config: ResolvedConfig,
    policy: access::AccessPolicy,
    store: S,
    engine_config: EngineConfig,
    capture: CaptureAdaptor<InMemoryFrameSource>,
) -> Result<(), DaemonError> {
    let engine = daemon::AuthorizationEngine::new(policy, store, Box::new(core::clock::SystemClock), engine_config);
    let mut control = ControlPlane::new(config, engine, capture)?;
    control.run()
}
