//! Environment variable layer.
//!
//! `ADVISORY_<SECTION>_<KEY>` maps onto `[section] key` of the TOML schema,
//! so `ADVISORY_GATE_EMISSION_BUDGET=3` is equivalent to
//! `[gate] emission_budget = 3` in a file layer.

use super::ConfigFile;
use crate::{Error, Result};
use toml::{Table, Value};

/// Prefix shared by all configuration variables.
pub const ENV_PREFIX: &str = "ADVISORY_";

const SECTIONS: &[&str] = &[
    "ranker",
    "cache",
    "gate",
    "synthesis",
    "feedback",
    "workers",
];

const STRING_KEYS: &[&str] = &[
    "data_dir",
    "refinement_endpoint",
    "refinement_model",
    "format",
    "filter",
    "file",
];

/// A captured set of environment variables.
///
/// Resolution never reads the process environment directly, so tests and
/// hot reloads see a stable view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars(Vec<(String, String)>);

impl EnvVars {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a set from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Captures `ADVISORY_*` variables from a `.env` file and the process.
    ///
    /// Process variables win over `.env` entries.
    #[must_use]
    pub fn from_process() -> Self {
        let mut vars = Vec::new();
        if let Ok(iter) = dotenvy::dotenv_iter() {
            vars.extend(
                iter.filter_map(std::result::Result::ok)
                    .filter(|(k, _)| k.starts_with(ENV_PREFIX)),
            );
        }
        vars.extend(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)));
        Self(vars)
    }

    /// Returns the last value set for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if no variables are captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Builds the environment configuration layer.
///
/// Returns `Ok(None)` if no `ADVISORY_*` variables are set.
///
/// # Errors
///
/// Returns [`Error::ConfigResolution`] if any value has the wrong type for
/// its key. The whole layer is rejected in that case.
pub fn env_layer(vars: &EnvVars) -> Result<Option<ConfigFile>> {
    let mut root = Table::new();

    for (name, raw) in vars.iter() {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let rest = rest.to_lowercase();
        let Some((path, key)) = split_key(&rest) else {
            tracing::debug!(var = %name, "Ignoring unrecognized configuration variable");
            continue;
        };
        let value = if key == "prefetch_tools" {
            Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        } else if STRING_KEYS.contains(&key.as_str()) {
            Value::String(raw.to_string())
        } else {
            parse_scalar(raw)
        };
        insert_path(&mut root, &path, key, value);
    }

    if root.is_empty() {
        return Ok(None);
    }

    Value::Table(root)
        .try_into::<ConfigFile>()
        .map(Some)
        .map_err(|e| Error::ConfigResolution {
            layer: "env".to_string(),
            cause: e.to_string(),
        })
}

/// Splits a lowercased variable name into a table path and a key.
fn split_key(rest: &str) -> Option<(Vec<&'static str>, String)> {
    match rest {
        "data_dir" | "reload_interval_secs" => return Some((Vec::new(), rest.to_string())),
        "log" => return Some((vec!["logging"], "filter".to_string())),
        "log_format" => return Some((vec!["logging"], "format".to_string())),
        "log_file" => return Some((vec!["logging"], "file".to_string())),
        _ => {},
    }

    if let Some(tier) = rest.strip_prefix("gate_threshold_") {
        return Some((vec!["gate", "thresholds"], tier.to_string()));
    }
    if let Some(source) = rest.strip_prefix("gate_source_shown_ttl_") {
        return Some((vec!["gate", "source_shown_ttl_secs"], source.to_string()));
    }

    SECTIONS.iter().find_map(|section| {
        rest.strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
            .filter(|key| !key.is_empty())
            .map(|key| (vec![*section], key.to_string()))
    })
}

fn parse_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return Value::Boolean(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(raw.to_string())
}

fn insert_path(root: &mut Table, path: &[&str], key: String, value: Value) {
    let mut table = root;
    for segment in path {
        let entry = table
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        let Value::Table(next) = entry else {
            return;
        };
        table = next;
    }
    table.insert(key, value);
}
