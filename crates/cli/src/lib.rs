#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! The command-line surface: [`Cli`] parses the flag table from the
//! external-interfaces section of this daemon's design into a typed
//! structure, [`Cli::resolve_verb`] turns the admin-verb flags into a
//! single [`AdminVerb`] (rejecting more than one, matching the reference's
//! mutual-exclusivity rule), and [`Cli::overrides`] projects the
//! CLI-sourced fields into [`config::CliOverrides`] for
//! [`config::ResolvedConfig::resolve`].
//!
//! # Design
//!
//! Argument parsing itself (`-D`, `-K`, `-R`, `-S`, `--fw-list`,
//! `--rotate-digest-cache`, `-V`, `-h`) never touches a config file or the
//! filesystem; it is pure over `argv`. The binary crate is the only place
//! that turns a resolved [`AdminVerb`] into an actual side effect (reading
//! a pidfile, invoking the firewall binary, entering the event loop).
//!
//! `-c` is modeled as a repeatable flag precisely so a second occurrence
//! can be rejected outright, rather than silently picking one of two
//! values — see [`CliError::DuplicateConfigFile`] and the corresponding
//! resolution in `DESIGN.md`.
//!
//! # Invariants
//!
//! - At most one admin-verb flag may be set; [`Cli::resolve_verb`] returns
//!   [`CliError::ConflictingVerbs`] naming every flag that was set
//!   otherwise.
//! - `-v` is cumulative; repeating it any number of times only ever raises
//!   verbosity, it never errors.
//!
//! # Errors
//!
//! [`CliError`] covers the two validation failures this crate can produce
//! on top of clap's own argument-syntax errors: a duplicate `-c` and more
//! than one admin verb.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Parsed command-line arguments, matching the external-interfaces flag
/// table.
#[derive(Debug, Parser)]
#[command(
    name = "spa-authd",
    about = "Single Packet Authorization server core",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// `-a`: access policy file path (overrides config).
    #[arg(short = 'a', value_name = "PATH")]
    pub access_file: Option<PathBuf>,

    /// `-c`: main config file. Repeated to detect (and reject) a second
    /// occurrence rather than silently picking one.
    #[arg(short = 'c', value_name = "PATH")]
    pub config_file: Vec<PathBuf>,

    /// `-C <n>`: stop after processing `n` candidate packets.
    #[arg(short = 'C', value_name = "N")]
    pub packet_limit: Option<u64>,

    /// `-D`: dump resolved config; exit 0.
    #[arg(short = 'D')]
    pub dump_config: bool,

    /// `-f`: foreground (no daemonize).
    #[arg(short = 'f')]
    pub foreground: bool,

    /// `-i <iface>`: capture interface.
    #[arg(short = 'i', value_name = "IFACE")]
    pub interface: Option<String>,

    /// `-K`: kill running instance.
    #[arg(short = 'K')]
    pub kill: bool,

    /// `-O <f[,f...]>`: override config fragments applied in order.
    /// Repeatable; each occurrence may itself be a comma-separated list.
    #[arg(short = 'O', value_name = "PATH", value_delimiter = ',')]
    pub override_files: Vec<PathBuf>,

    /// `-P <expr>`: capture filter expression.
    #[arg(short = 'P', value_name = "EXPR")]
    pub capture_filter: Option<String>,

    /// `-R`: restart.
    #[arg(short = 'R')]
    pub restart: bool,

    /// `-S`: status.
    #[arg(short = 'S')]
    pub status: bool,

    /// `-v`: verbosity; cumulative.
    #[arg(short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// `-V`: version; exit 0.
    #[arg(short = 'V')]
    pub version: bool,

    /// `--fw-list`: list daemon rules; exit 0.
    #[arg(long = "fw-list")]
    pub fw_list: bool,

    /// `--rotate-digest-cache`: rotate cache; exit 0.
    #[arg(long = "rotate-digest-cache")]
    pub rotate_digest_cache: bool,

    /// `--gpg-home-dir <dir>`: GPG home override.
    #[arg(long = "gpg-home-dir", value_name = "DIR")]
    pub gpg_home_dir: Option<PathBuf>,

    /// `-l <locale>`: locale override.
    #[arg(short = 'l', value_name = "LOCALE")]
    pub locale: Option<String>,

    /// `-h`: usage; exit 0.
    #[arg(short = 'h')]
    pub help: bool,
}

/// The single admin verb a resolved [`Cli`] invocation names. Exactly one
/// of these is acted on per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminVerb {
    /// No verb flag was given: initialize and enter the main loop.
    Start,
    /// `-D`: print resolved configuration, then exit.
    DumpConfig,
    /// `-K`: signal a running instance to terminate.
    Kill,
    /// `-R`: kill, then start.
    Restart,
    /// `-S`: report pidfile liveness and per-chain rule counts.
    Status,
    /// `--fw-list`: enumerate daemon-owned chains and their rules.
    FwList,
    /// `--rotate-digest-cache`: rotate the replay cache file.
    RotateDigestCache,
    /// `-V`: print the version banner.
    Version,
    /// `-h`: print usage.
    Help,
}

impl AdminVerb {
    /// The flag name used in [`CliError::ConflictingVerbs`] messages.
    fn flag_name(self) -> &'static str {
        match self {
            AdminVerb::Start => "(start)",
            AdminVerb::DumpConfig => "-D",
            AdminVerb::Kill => "-K",
            AdminVerb::Restart => "-R",
            AdminVerb::Status => "-S",
            AdminVerb::FwList => "--fw-list",
            AdminVerb::RotateDigestCache => "--rotate-digest-cache",
            AdminVerb::Version => "-V",
            AdminVerb::Help => "-h",
        }
    }
}

/// Failure validating a parsed [`Cli`] beyond what clap's grammar already
/// enforces.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// `-c` was given more than once. Accepting the last one silently
    /// would only be correct by accident once `-O` enters the picture; see
    /// `DESIGN.md`.
    #[error("-c (config file) may only be given once, got {0}")]
    DuplicateConfigFile(usize),
    /// More than one admin-verb flag was set.
    #[error("conflicting options: {0} may not be combined")]
    ConflictingVerbs(String),
}

impl Cli {
    /// Parses `args` (including the program name at index 0, matching
    /// [`std::env::args_os`]).
    pub fn parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Cli::try_parse_from(args)
    }

    /// Returns the single resolved config file path, failing if `-c` was
    /// given more than once.
    pub fn config_file(&self) -> Result<Option<&PathBuf>, CliError> {
        match self.config_file.len() {
            0 => Ok(None),
            1 => Ok(self.config_file.first()),
            n => Err(CliError::DuplicateConfigFile(n)),
        }
    }

    /// Resolves which single admin verb this invocation names, rejecting
    /// any combination of more than one.
    pub fn resolve_verb(&self) -> Result<AdminVerb, CliError> {
        let candidates = [
            (self.help, AdminVerb::Help),
            (self.version, AdminVerb::Version),
            (self.dump_config, AdminVerb::DumpConfig),
            (self.kill, AdminVerb::Kill),
            (self.restart, AdminVerb::Restart),
            (self.status, AdminVerb::Status),
            (self.fw_list, AdminVerb::FwList),
            (self.rotate_digest_cache, AdminVerb::RotateDigestCache),
        ];

        let set: Vec<AdminVerb> = candidates.iter().filter(|(flag, _)| *flag).map(|(_, verb)| *verb).collect();

        match set.as_slice() {
            [] => Ok(AdminVerb::Start),
            [only] => Ok(*only),
            many => {
                let names = many.iter().map(|verb| verb.flag_name()).collect::<Vec<_>>().join(", ");
                Err(CliError::ConflictingVerbs(names))
            }
        }
    }

    /// Projects the CLI-sourced fields into a [`config::CliOverrides`] for
    /// [`config::ResolvedConfig::resolve`]. Independent of [`resolve_verb`]
    /// so the binary can dump overrides even when a one-shot verb is
    /// selected.
    #[must_use]
    pub fn overrides(&self) -> config::CliOverrides {
        config::CliOverrides {
            access_file: self.access_file.clone(),
            interface: self.interface.clone(),
            capture_filter: self.capture_filter.clone(),
            gpg_home_dir: self.gpg_home_dir.clone(),
            locale: self.locale.clone(),
            foreground: self.foreground,
            verbosity: self.verbose,
            packet_limit: self.packet_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["spa-authd"];
        argv.extend_from_slice(args);
        Cli::parse_args(argv).unwrap()
    }

    #[test]
    fn no_flags_resolves_to_start() {
        let cli = parse(&[]);
        assert_eq!(cli.resolve_verb().unwrap(), AdminVerb::Start);
    }

    #[test]
    fn dash_d_resolves_to_dump_config() {
        let cli = parse(&["-D"]);
        assert_eq!(cli.resolve_verb().unwrap(), AdminVerb::DumpConfig);
    }

    #[test]
    fn combining_two_verbs_is_rejected() {
        let cli = parse(&["-K", "-S"]);
        assert!(matches!(cli.resolve_verb(), Err(CliError::ConflictingVerbs(_))));
    }

    #[test]
    fn verbose_is_cumulative() {
        let cli = parse(&["-vvv"]);
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn single_dash_c_resolves() {
        let cli = parse(&["-c", "/etc/spa-authd/spa-authd.conf"]);
        assert_eq!(cli.config_file().unwrap().map(PathBuf::as_path), Some(std::path::Path::new("/etc/spa-authd/spa-authd.conf")));
    }

    #[test]
    fn duplicate_dash_c_is_rejected() {
        let cli = parse(&["-c", "/a.conf", "-c", "/b.conf"]);
        assert!(matches!(cli.config_file(), Err(CliError::DuplicateConfigFile(2))));
    }

    #[test]
    fn dash_o_with_commas_splits_into_separate_fragments() {
        let cli = parse(&["-O", "/a.conf,/b.conf"]);
        assert_eq!(cli.override_files, vec![PathBuf::from("/a.conf"), PathBuf::from("/b.conf")]);
    }

    #[test]
    fn repeated_dash_o_accumulates_in_order() {
        let cli = parse(&["-O", "/a.conf", "-O", "/b.conf,/c.conf"]);
        assert_eq!(
            cli.override_files,
            vec![PathBuf::from("/a.conf"), PathBuf::from("/b.conf"), PathBuf::from("/c.conf")]
        );
    }

    #[test]
    fn overrides_projects_cli_fields() {
        let cli = parse(&["-a", "/etc/access.conf", "-f", "-C", "5"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.access_file, Some(PathBuf::from("/etc/access.conf")));
        assert!(overrides.foreground);
        assert_eq!(overrides.packet_limit, Some(5));
    }
}
