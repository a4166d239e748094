//! Load-time variable resolution.
//!
//! The `variables` section layers three sources, lowest to highest
//! precedence: env file contents, process environment entries for every name
//! textually referenced in `${…}` positions, then the inline `values` with
//! `${NAME}` / `${NAME:default}` expansion performed against the merged
//! layers. Everything is read once into a snapshot; request handling never
//! touches the process environment again.

use std::path::Path;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::model::VariablesConfig;
use crate::errors::{GatewayError, Result};

const REFERENCE_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}";

/// The resolved load-time key-value table. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    values: IndexMap<String, String>,
}

impl VariableSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    /// Builds a set from literal pairs, bypassing resolution. Useful for
    /// embedding and tests.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Builds the variable snapshot for one configuration document.
///
/// `base_dir` anchors a relative `env_file` path, so loading behaves the same
/// regardless of the process working directory.
pub fn resolve_variables(config: &VariablesConfig, base_dir: &Path) -> Result<VariableSet> {
    let mut merged: IndexMap<String, String> = IndexMap::new();

    if let Some(env_file) = &config.env_file {
        let path = base_dir.join(env_file);
        for item in dotenvy::from_path_iter(&path)? {
            let (key, value) = item?;
            merged.insert(key, value);
        }
    }

    // Import process env for names referenced anywhere in the inline values.
    let re = Regex::new(REFERENCE_PATTERN)?;
    for raw in config.values.values() {
        for cap in re.captures_iter(raw) {
            let name = &cap[1];
            if let Ok(value) = std::env::var(name) {
                merged.insert(name.to_string(), value);
            }
        }
    }

    let mut resolved = merged.clone();
    for (key, raw) in &config.values {
        let expanded = expand(raw, |name| merged.get(name).cloned())?;
        resolved.insert(key.clone(), expanded);
    }

    Ok(VariableSet { values: resolved })
}

/// Expands `${NAME}` / `${NAME:default}` references using the given lookup.
/// A missing name without a default is an error naming the reference.
pub fn expand<F>(text: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(REFERENCE_PATTERN)?;

    let mut result = String::with_capacity(text.len());
    let mut last_match = 0;

    for cap in re.captures_iter(text) {
        let full = cap.get(0).expect("capture 0 always present");
        let name = &cap[1];

        result.push_str(&text[last_match..full.start()]);

        match lookup(name).or_else(|| cap.get(2).map(|d| d.as_str().to_string())) {
            Some(value) => result.push_str(&value),
            None => {
                return Err(GatewayError::ConfigLoad(format!(
                    "unresolved variable reference ${{{name}}}"
                )))
            }
        }

        last_match = full.end();
    }

    result.push_str(&text[last_match..]);
    Ok(result)
}

/// Expansion against the process environment, used for webhook header values.
pub fn expand_process_env(text: &str) -> Result<String> {
    expand(text, |name| std::env::var(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_with_default() {
        let out = expand("host=${DB_HOST:localhost}", |_| None).unwrap();
        assert_eq!(out, "host=localhost");
    }

    #[test]
    fn test_expand_lookup_beats_default() {
        let out = expand("${NAME:fallback}", |name| {
            (name == "NAME").then(|| "real".to_string())
        })
        .unwrap();
        assert_eq!(out, "real");
    }

    #[test]
    fn test_expand_missing_errors() {
        assert!(expand("${NOPE}", |_| None).is_err());
    }
}
