//! Compiler configuration: `[Configuration]` blocks and library options.

use std::path::PathBuf;

/// Settings a source file can change with a `[Configuration]` block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Configuration {
    /// Number that the first `[n]` selector index denotes.
    pub index_initial_count: usize,
    /// Keep `.name { }` rules from adding `class="name"` to their element.
    pub disable_style_auto_add_class: bool,
    /// Keep `#name { }` rules from adding `id="name"` to their element.
    pub disable_style_auto_add_id: bool,
    /// Log every template expansion.
    pub debug_mode: bool,
}

impl Configuration {
    /// Apply one `KEY = value` pair.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "INDEX_INITIAL_COUNT" => {
                self.index_initial_count = value
                    .parse()
                    .map_err(|_| format!("INDEX_INITIAL_COUNT expects a non-negative integer, got '{value}'"))?;
            }
            "DISABLE_STYLE_AUTO_ADD_CLASS" => self.disable_style_auto_add_class = parse_bool(key, value)?,
            "DISABLE_STYLE_AUTO_ADD_ID" => self.disable_style_auto_add_id = parse_bool(key, value)?,
            "DEBUG_MODE" => self.debug_mode = parse_bool(key, value)?,
            _ => return Err(format!("Unknown configuration key '{key}'")),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("{key} expects true or false, got '{value}'")),
    }
}

/// Options for a whole compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Directories searched, in order, for imports not found next to the importing file.
    pub module_dirs: Vec<PathBuf>,
    /// Configuration in effect before any `[Configuration]` block.
    pub configuration: Configuration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_known_keys() {
        let mut config = Configuration::default();
        config.set("INDEX_INITIAL_COUNT", "1").unwrap();
        config.set("DEBUG_MODE", "true").unwrap();
        config.set("DISABLE_STYLE_AUTO_ADD_CLASS", "true").unwrap();
        assert_eq!(config.index_initial_count, 1);
        assert!(config.debug_mode);
        assert!(config.disable_style_auto_add_class);
        assert!(!config.disable_style_auto_add_id);
    }

    #[test]
    fn test_rejects_unknown_key_and_bad_values() {
        let mut config = Configuration::default();
        assert!(config.set("THEME", "dark").unwrap_err().contains("Unknown configuration key"));
        assert!(config.set("DEBUG_MODE", "yes").is_err());
        assert!(config.set("INDEX_INITIAL_COUNT", "-1").is_err());
    }
}
