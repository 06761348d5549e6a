use std::collections::{BTreeMap, HashMap};
use std::env;

use anyhow::Result;
use pdmb_domain::BackendError;
use serde::{Deserialize, Serialize};

/// Process environment captured once per build.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// All captured variables, for handing down to child processes.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `PDM_BUILD_NO_CLEAN` asks to keep the build directory unless it is
    /// one of `0`, `false` or `no`.
    pub(crate) fn no_clean_requested(&self) -> bool {
        self.var("PDM_BUILD_NO_CLEAN").is_some_and(|value| {
            let lowered = value.to_ascii_lowercase();
            !matches!(lowered.as_str(), "0" | "false" | "no")
        })
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Free-form `config_settings` handed over by the build front-end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSettings {
    values: BTreeMap<String, String>,
}

impl ConfigSettings {
    /// Parses `key=value` pairs; a bare `key` maps to an empty value.
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return Err(BackendError::config(format!("invalid config setting {pair:?}")).into());
            }
            values.insert(key.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Looks up a `--flag` style option, also accepting it without dashes.
    pub fn option(&self, name: &str) -> Option<&str> {
        let bare = name.trim_start_matches('-');
        self.get(&format!("--{bare}")).or_else(|| self.get(bare))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
