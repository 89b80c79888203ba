//! The `KEY VALUE` file grammar shared by the main config file and every
//! override fragment.

use std::fs;
use std::path::Path;

use crate::ConfigError;

/// One parsed config file: an ordered sequence of `KEY = VALUE` pairs,
/// later entries for the same key overriding earlier ones within the same
/// file.
///
/// Order is kept (rather than collapsed into a map immediately) because
/// `$NAME` expansion resolves against "the most recently parsed value of
/// `NAME`, looking backward from the current line" — a plain `HashMap`
/// would lose that direction.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    entries: Vec<(String, String)>,
}

impl RawConfig {
    /// Parses `path` from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parses config text directly.
    ///
    /// `#`-prefixed and blank lines are skipped. A value beginning with a
    /// leading run of ASCII letters/underscores is treated as a `$NAME`
    /// reference: that leading run is looked up against keys already
    /// parsed (most recent wins) and, if found, prefix-substituted —
    /// anything after the name run is appended to the substituted value
    /// literally. An unresolved reference (the name was never set, or the
    /// value has no leading name-shaped run) is left as literal text, not
    /// an error: unknown keys and unresolved variables warn via
    /// [`tracing::warn!`] rather than failing the parse, since a later
    /// override fragment may still be able to use a partially-unknown
    /// config.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, rest)) = line.split_once(char::is_whitespace) else {
                tracing::warn!(line = line_no, %line, "config line has no value, ignoring");
                continue;
            };
            let key = key.trim();
            let value = rest.trim();

            let expanded = expand_var(value, &entries);
            entries.push((key.to_string(), expanded));
        }

        Self { entries }
    }

    /// Applies `other`'s entries on top of this one, later entries
    /// overriding earlier entries for the same key (last write wins),
    /// matching how override fragments (`-O`) are layered onto the main
    /// file.
    pub fn merge(&mut self, other: RawConfig) {
        for (key, value) in other.entries {
            self.set(&key, value);
        }
    }

    /// Sets `key` to `value`, overwriting its previous value if one was
    /// already present.
    pub fn set(&mut self, key: &str, value: String) {
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    /// Looks up the current value of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Returns every entry sharing `prefix`, in parse order, for
    /// repeatable directives like chain bindings.
    #[must_use]
    pub fn get_all_prefixed(&self, prefix: &str) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Every entry, in parse order, for `dump-config` rendering.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Expands a single leading `$NAME` reference in `value` against
/// already-parsed entries, looking backward (most recent first).
fn expand_var(value: &str, parsed_so_far: &[(String, String)]) -> String {
    let Some(rest) = value.strip_prefix('$') else {
        return value.to_string();
    };
    let name_len = rest
        .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
        .unwrap_or(rest.len());
    if name_len == 0 {
        return value.to_string();
    }
    let (name, tail) = rest.split_at(name_len);
    match parsed_so_far.iter().rev().find(|(k, _)| k == name) {
        Some((_, substituted)) => format!("{substituted}{tail}"),
        None => {
            tracing::warn!(%name, "$VAR reference to an unset key, leaving literal");
            value.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs_skipping_comments_and_blanks() {
        let cfg = RawConfig::parse("# comment\n\nFOO bar\nBAZ  qux\n");
        assert_eq!(cfg.get("FOO"), Some("bar"));
        assert_eq!(cfg.get("BAZ"), Some("qux"));
    }

    #[test]
    fn expands_dollar_variable_by_prefix_substitution() {
        let cfg = RawConfig::parse("HOME_DIR /etc/spa\nACCESS_FILE $HOME_DIR/access.conf\n");
        assert_eq!(cfg.get("ACCESS_FILE"), Some("/etc/spa/access.conf"));
    }

    #[test]
    fn unresolved_variable_reference_is_left_literal() {
        let cfg = RawConfig::parse("ACCESS_FILE $MISSING/access.conf\n");
        assert_eq!(cfg.get("ACCESS_FILE"), Some("$MISSING/access.conf"));
    }

    #[test]
    fn later_key_wins_within_one_file() {
        let cfg = RawConfig::parse("FOO one\nFOO two\n");
        assert_eq!(cfg.get("FOO"), Some("two"));
    }

    #[test]
    fn merge_applies_override_fragment_on_top() {
        let mut base = RawConfig::parse("FOO base\nBAR unchanged\n");
        let fragment = RawConfig::parse("FOO overridden\n");
        base.merge(fragment);
        assert_eq!(base.get("FOO"), Some("overridden"));
        assert_eq!(base.get("BAR"), Some("unchanged"));
    }

    #[test]
    fn get_all_prefixed_preserves_definition_order() {
        let cfg = RawConfig::parse("FW_CHAIN_A one\nFW_CHAIN_B two\nOTHER x\n");
        let chains = cfg.get_all_prefixed("FW_CHAIN_");
        assert_eq!(chains, vec![("FW_CHAIN_A", "one"), ("FW_CHAIN_B", "two")]);
    }

    #[test]
    fn only_a_leading_alphabetic_or_underscore_run_is_treated_as_a_variable_name() {
        let cfg = RawConfig::parse("PORT 2222\nTARGET $PORT-ish\n");
        assert_eq!(cfg.get("TARGET"), Some("2222-ish"));
    }
}
