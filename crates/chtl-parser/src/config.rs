//! Compilation settings read from a `[Configuration]` block.

use crate::ast::ConfigBlock;
use serde::Serialize;

/// Settings for one compilation session. Defaults apply when the root unit
/// has no `[Configuration]` block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Configuration {
    /// Base for `tag[N]` selectors and the start of `classN`/`idN` counters.
    pub index_initial_count: i64,
    pub debug_mode: bool,
    pub disable_auto_class: bool,
    pub disable_auto_id: bool,
    pub disable_default_namespace: bool,
}

impl Configuration {
    /// Build a configuration from a parsed block. Returns the settings and a
    /// warning for every entry that was not understood.
    pub fn from_block(block: &ConfigBlock) -> (Self, Vec<String>) {
        let mut config = Self::default();
        let mut warnings = Vec::new();

        for entry in &block.entries {
            let Some(value) = entry.value.as_deref() else {
                warnings.push(format!("Configuration key '{}' has no value", entry.name));
                continue;
            };

            let result = match entry.name.as_str() {
                "INDEX_INITIAL_COUNT" => value
                    .parse::<i64>()
                    .map(|n| config.index_initial_count = n)
                    .map_err(|_| "an integer"),
                "DEBUG_MODE" => parse_bool(value).map(|b| config.debug_mode = b),
                "DISABLE_STYLE_AUTO_ADD_CLASS"
                | "DISABLE_SCRIPT_AUTO_ADD_CLASS"
                | "DISABLE_AUTO_CLASS" => {
                    parse_bool(value).map(|b| config.disable_auto_class = b)
                }
                "DISABLE_STYLE_AUTO_ADD_ID" | "DISABLE_SCRIPT_AUTO_ADD_ID" | "DISABLE_AUTO_ID" => {
                    parse_bool(value).map(|b| config.disable_auto_id = b)
                }
                "DISABLE_DEFAULT_NAMESPACE" => {
                    parse_bool(value).map(|b| config.disable_default_namespace = b)
                }
                other => {
                    warnings.push(format!("Unknown configuration key '{other}'"));
                    continue;
                }
            };

            if let Err(expected) = result {
                warnings.push(format!(
                    "Configuration key '{}' expects {expected}, got '{value}'",
                    entry.name
                ));
            }
        }

        (config, warnings)
    }
}

fn parse_bool(value: &str) -> Result<bool, &'static str> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("true or false"),
    }
}
