//! Tool defaults from `$SWEEP_HOME/defaults.yml`.
//!
//! ```yaml
//! machine: slurm
//! agg: true
//! submit:
//!   stagger: true
//!   batch: 8
//! ```
//!
//! A per-command section overrides the top-level value for that command.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const HOME_ENV: &str = "SWEEP_HOME";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub machine: String,
    pub parser: String,
    pub format: String,
    pub agg: bool,
    pub timeout: bool,
    pub interval_ms: u64,
    pub batch: usize,
    pub stagger: bool,
    #[serde(flatten)]
    sections: BTreeMap<String, serde_yaml::Value>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            machine: "local".to_string(),
            parser: crate::extract::DEFAULT_EXTRACTOR.to_string(),
            format: "tsv".to_string(),
            agg: false,
            timeout: true,
            interval_ms: 10_000,
            batch: 1,
            stagger: false,
            sections: BTreeMap::new(),
        }
    }
}

impl Defaults {
    /// Value of `key` inside the `command:` section, if present and well-typed.
    pub fn nested<T: DeserializeOwned>(&self, command: &str, key: &str) -> Option<T> {
        let value = self.sections.get(command)?.get(key)?;
        serde_yaml::from_value(value.clone()).ok()
    }

    pub fn machine(&self, command: &str) -> String {
        self.nested(command, "machine").unwrap_or_else(|| self.machine.clone())
    }

    pub fn parser(&self, command: &str) -> String {
        self.nested(command, "parser").unwrap_or_else(|| self.parser.clone())
    }

    pub fn format(&self, command: &str) -> String {
        self.nested(command, "format").unwrap_or_else(|| self.format.clone())
    }

    pub fn agg(&self, command: &str) -> bool {
        self.nested(command, "agg").unwrap_or(self.agg)
    }

    pub fn timeout(&self, command: &str) -> bool {
        self.nested(command, "timeout").unwrap_or(self.timeout)
    }

    pub fn interval_ms(&self, command: &str) -> u64 {
        self.nested(command, "interval_ms").unwrap_or(self.interval_ms)
    }

    pub fn batch(&self, command: &str) -> usize {
        self.nested(command, "batch").unwrap_or(self.batch)
    }

    pub fn stagger(&self, command: &str) -> bool {
        self.nested(command, "stagger").unwrap_or(self.stagger)
    }
}

/// `$SWEEP_HOME`, else `~/.sweep`.
pub fn sweep_home() -> Option<PathBuf> {
    match std::env::var_os(HOME_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::home_dir().map(|home| home.join(".sweep")),
    }
}

/// A missing file falls back to the built-in defaults silently; a malformed
/// one falls back with a warning.
pub fn load_defaults(home: Option<&Path>) -> Defaults {
    let Some(path) = home.map(|h| h.join("defaults.yml")) else {
        return Defaults::default();
    };
    let Ok(text) = fs::read_to_string(&path) else {
        return Defaults::default();
    };
    match serde_yaml::from_str::<Option<Defaults>>(&text) {
        Ok(parsed) => parsed.unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed defaults; using built-in values");
            Defaults::default()
        }
    }
}
