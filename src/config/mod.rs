//! Runtime configuration, passed explicitly into the components that need it.
//!
//! Nothing here is global: the CLI builds a [`BatchConfig`] and an
//! [`EngineRegistry`] from flags and environment and hands them down.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::consts::{DEFAULT_INVOKE_TIMEOUT, DEFAULT_MAX_CONCURRENCY, default_results_dir};
use crate::dispatch::DispatchConfig;

/// Engine keys known out of the box, each read from `<KEY>_AGENT_ENGINE_ID`.
pub const KNOWN_ENGINE_KEYS: &[&str] = &["doc", "spl"];

/// Settings for the batch pipeline.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_concurrency: usize,
    pub invoke_timeout: Duration,
    pub results_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            results_dir: default_results_dir(),
        }
    }
}

impl BatchConfig {
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrency: self.max_concurrency,
            invoke_timeout: self.invoke_timeout,
        }
    }
}

/// Maps short engine keys (`doc`, `spl`) to deployed agent engine ids.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, String>,
}

impl EngineRegistry {
    /// Read `DOC_AGENT_ENGINE_ID`, `SPL_AGENT_ENGINE_ID`, ... from the
    /// environment. Unset or empty variables are skipped.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let engines = KNOWN_ENGINE_KEYS
            .iter()
            .filter_map(|key| {
                let var = format!("{}_AGENT_ENGINE_ID", key.to_uppercase());
                lookup(&var)
                    .filter(|id| !id.is_empty())
                    .map(|id| (key.to_string(), id))
            })
            .collect();
        Self { engines }
    }

    pub fn resolve(&self, key: &str) -> Result<&str> {
        self.engines
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("unknown engine '{key}' (set {}_AGENT_ENGINE_ID)", key.to_uppercase()))
    }
}
