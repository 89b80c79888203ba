//! Parses `FW_CHAIN_<KIND>` directives into [`firewall::ChainBinding`]s.

use firewall::{ChainBinding, Direction};

use crate::ConfigError;

const PREFIX: &str = "FW_CHAIN_";

/// Parses every `FW_CHAIN_<KIND>` entry in `raw`, in the order they were
/// defined — that order becomes the binding iteration order the firewall
/// driver uses.
///
/// Each value is seven whitespace-separated fields: `table from_chain
/// jump_position to_chain initial_rule_position direction target_verdict`.
/// `direction` is one of `src`, `dst`, `both` (case-insensitive).
pub fn parse_chain_bindings(raw: &crate::main_config::RawConfig) -> Result<Vec<ChainBinding>, ConfigError> {
    raw.get_all_prefixed(PREFIX)
        .into_iter()
        .map(|(key, value)| {
            let kind = key[PREFIX.len()..].to_ascii_lowercase();
            parse_one(&kind, value)
        })
        .collect()
}

fn parse_one(kind: &str, value: &str) -> Result<ChainBinding, ConfigError> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    let [table, from_chain, jump_position, to_chain, initial_rule_position, direction, target_verdict] =
        fields.as_slice()
    else {
        return Err(ConfigError::Invalid(format!(
            "FW_CHAIN_{} requires 7 fields (table from_chain jump_position to_chain initial_rule_position direction target_verdict), got `{value}`",
            kind.to_ascii_uppercase()
        )));
    };

    let jump_position: u32 = jump_position.parse().map_err(|_| {
        ConfigError::Invalid(format!("FW_CHAIN_{}: invalid jump_position `{jump_position}`", kind.to_ascii_uppercase()))
    })?;
    let initial_rule_position: u32 = initial_rule_position.parse().map_err(|_| {
        ConfigError::Invalid(format!(
            "FW_CHAIN_{}: invalid initial_rule_position `{initial_rule_position}`",
            kind.to_ascii_uppercase()
        ))
    })?;
    let direction = match direction.to_ascii_lowercase().as_str() {
        "src" => Direction::Src,
        "dst" => Direction::Dst,
        "both" => Direction::Both,
        other => {
            return Err(ConfigError::Invalid(format!(
                "FW_CHAIN_{}: unknown direction `{other}`, expected src/dst/both",
                kind.to_ascii_uppercase()
            )));
        }
    };

    Ok(ChainBinding {
        kind: kind.to_string(),
        target_verdict: (*target_verdict).to_string(),
        direction,
        table: (*table).to_string(),
        from_chain: (*from_chain).to_string(),
        jump_position,
        to_chain: (*to_chain).to_string(),
        initial_rule_position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_config::RawConfig;

    #[test]
    fn parses_a_single_chain_binding() {
        let raw = RawConfig::parse("FW_CHAIN_INPUT filter INPUT 1 SPA_INPUT 1 src ACCEPT\n");
        let bindings = parse_chain_bindings(&raw).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].kind, "input");
        assert_eq!(bindings[0].to_chain, "SPA_INPUT");
        assert_eq!(bindings[0].direction, Direction::Src);
    }

    #[test]
    fn preserves_definition_order_across_multiple_bindings() {
        let raw = RawConfig::parse(
            "FW_CHAIN_INPUT filter INPUT 1 SPA_INPUT 1 src ACCEPT\n\
             FW_CHAIN_FORWARD filter FORWARD 1 SPA_FORWARD 1 dst ACCEPT\n",
        );
        let bindings = parse_chain_bindings(&raw).unwrap();
        assert_eq!(bindings[0].kind, "input");
        assert_eq!(bindings[1].kind, "forward");
    }

    #[test]
    fn rejects_wrong_field_count() {
        let raw = RawConfig::parse("FW_CHAIN_INPUT filter INPUT 1 SPA_INPUT\n");
        assert!(parse_chain_bindings(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_direction() {
        let raw = RawConfig::parse("FW_CHAIN_INPUT filter INPUT 1 SPA_INPUT 1 sideways ACCEPT\n");
        assert!(parse_chain_bindings(&raw).is_err());
    }
}
