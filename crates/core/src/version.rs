//! Canonical program identity and default filesystem locations.
//!
//! Centralising these here keeps the CLI's usage text, the config loader's
//! fallback paths, and the control plane's pidfile location in agreement
//! without every crate restating string literals.

use std::path::Path;

/// Canonical program name, as printed by `-V` and used in log output.
pub const PROGRAM_NAME: &str = "spa-authd";

/// Crate version, taken from the workspace package version.
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory packages install for daemon configuration.
#[doc(alias = "/etc/spa-authd")]
pub const CONFIG_DIR: &str = "/etc/spa-authd";

/// Default main config file path, used when `-c` is not given.
#[doc(alias = "/etc/spa-authd/spa-authd.conf")]
pub const DEFAULT_CONFIG_PATH: &str = "/etc/spa-authd/spa-authd.conf";

/// Default access policy file path, used when `-a` is not given.
#[doc(alias = "/etc/spa-authd/access.conf")]
pub const DEFAULT_ACCESS_PATH: &str = "/etc/spa-authd/access.conf";

/// Default pidfile path, the daemon's exclusive-run token.
#[doc(alias = "/var/run/spa-authd.pid")]
pub const DEFAULT_PID_PATH: &str = "/var/run/spa-authd.pid";

/// Default replay (digest) cache file path.
#[doc(alias = "/var/run/spa-authd/digest.cache")]
pub const DEFAULT_DIGEST_CACHE_PATH: &str = "/var/run/spa-authd/digest.cache";

/// Returns the default main config path.
#[must_use]
pub fn default_config_path() -> &'static Path {
    Path::new(DEFAULT_CONFIG_PATH)
}

/// Returns the default access policy path.
#[must_use]
pub fn default_access_path() -> &'static Path {
    Path::new(DEFAULT_ACCESS_PATH)
}

/// Returns the default pidfile path.
#[must_use]
pub fn default_pid_path() -> &'static Path {
    Path::new(DEFAULT_PID_PATH)
}

/// Returns the default digest cache path.
#[must_use]
pub fn default_digest_cache_path() -> &'static Path {
    Path::new(DEFAULT_DIGEST_CACHE_PATH)
}

/// Returns the `program vX.Y.Z` banner printed by `-V`.
#[must_use]
pub fn banner() -> String {
    format!("{PROGRAM_NAME} v{PROGRAM_VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_includes_program_name_and_version() {
        let banner = banner();
        assert!(banner.starts_with(PROGRAM_NAME));
        assert!(banner.contains(PROGRAM_VERSION));
    }
}
