//! Read-only pipeline configuration consulted while the graph is wired.

use std::fs;

use camino::Utf8Path;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read the configuration file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("couldn't parse the configuration YAML.\n{0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A nested configuration mapping loaded from YAML.
///
/// Switches are booleans or lists of booleans. A list forks the pipeline over
/// every listed setting, so a forked switch is on *and* off at the same time;
/// [`switch_is_on`](Configuration::switch_is_on) and
/// [`switch_is_off`](Configuration::switch_is_off) are therefore independent
/// predicates, not complements of each other.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    root: Value,
}

impl Configuration {
    /// Wrap an already-parsed nested value, normalizing `"None"` strings.
    pub fn from_value(root: Value) -> Self {
        Self {
            root: nonestr_to_null(root),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text)?;
        Ok(Self::from_value(root))
    }

    pub fn from_file(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// Look up a nested value by key path.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.root;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }

    /// Whether any entry exists at the key path.
    pub fn has_switch(&self, path: &[&str]) -> bool {
        self.get(path).is_some()
    }

    /// Whether the switch at the key path is enabled in any fork.
    pub fn switch_is_on(&self, path: &[&str]) -> bool {
        self.switch_values(path).contains(&true)
    }

    /// Whether the switch at the key path is disabled in any fork.
    ///
    /// Not the negation of [`switch_is_on`](Configuration::switch_is_on): a
    /// forked switch satisfies both, a missing one satisfies neither.
    pub fn switch_is_off(&self, path: &[&str]) -> bool {
        self.switch_values(path).contains(&false)
    }

    fn switch_values(&self, path: &[&str]) -> Vec<bool> {
        match self.get(path) {
            Some(Value::Array(items)) => items.iter().filter_map(as_switch_bool).collect(),
            Some(value) => as_switch_bool(value).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

// Configuration files in the wild spell booleans as YAML 1.1 `On`/`Off`,
// which a YAML 1.2 parser reads back as plain strings.
fn as_switch_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Recursively convert `"None"` strings to nulls through maps and sequences.
fn nonestr_to_null(value: Value) -> Value {
    match value {
        Value::String(text) if text.eq_ignore_ascii_case("none") => Value::Null,
        Value::Array(items) => Value::Array(items.into_iter().map(nonestr_to_null).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, nonestr_to_null(item)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUISANCE: [&str; 3] = ["nuisance_corrections", "2-nuisance_regression", "run"];

    fn config(yaml: &str) -> Configuration {
        Configuration::from_yaml(yaml).expect("test YAML should parse")
    }

    #[test]
    fn test_scalar_switch() {
        let cfg = config("nuisance_corrections:\n  2-nuisance_regression:\n    run: true\n");
        assert!(cfg.switch_is_on(&NUISANCE));
        assert!(!cfg.switch_is_off(&NUISANCE));
        assert!(cfg.has_switch(&NUISANCE));
    }

    #[test]
    fn test_forked_switch_is_on_and_off() {
        let cfg = config("nuisance_corrections:\n  2-nuisance_regression:\n    run: [true, false]\n");
        assert!(cfg.switch_is_on(&NUISANCE));
        assert!(cfg.switch_is_off(&NUISANCE));
    }

    #[test]
    fn test_missing_switch_is_neither() {
        let cfg = config("nuisance_corrections: {}\n");
        assert!(!cfg.switch_is_on(&NUISANCE));
        assert!(!cfg.switch_is_off(&NUISANCE));
        assert!(!cfg.has_switch(&NUISANCE));
    }

    #[test]
    fn test_yaml_11_on_off_spelling() {
        let cfg = config("nuisance_corrections:\n  2-nuisance_regression:\n    run: [On, Off]\n");
        assert!(cfg.switch_is_on(&NUISANCE));
        assert!(cfg.switch_is_off(&NUISANCE));
    }

    #[test]
    fn test_nonestr_normalization() {
        let cfg = config("registration:\n  reference: None\n  masks: [None, brain]\n");
        assert_eq!(cfg.get(&["registration", "reference"]), Some(&Value::Null));
        assert_eq!(
            cfg.get(&["registration", "masks"]).and_then(|v| v.get(0)),
            Some(&Value::Null)
        );
    }
}
