use std::collections::HashMap;
use std::env;

use anyhow::Result;

use crate::store::{resolve_cache_store_path, CacheLocation};

pub const DEFAULT_BUNDLE_BASE: &str = "https://static.ltx.dev/bundles";
pub const DEFAULT_PROXY_BASE: &str = "https://proxy.ltx.dev";
const DEFAULT_RETRY_LIMIT: u32 = 3;

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
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

/// Runtime configuration, captured once from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheLocation,
    pub bundle_base: String,
    pub proxy_base: String,
    pub online: bool,
    pub retry_limit: u32,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the cache path cannot be resolved.
    pub fn from_env() -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        Ok(Self {
            cache: resolve_cache_store_path(snapshot.var("LTX_CACHE_PATH"))?,
            bundle_base: snapshot
                .var("LTX_BUNDLE_URL")
                .map_or_else(|| DEFAULT_BUNDLE_BASE.to_string(), ToOwned::to_owned),
            proxy_base: snapshot
                .var("LTX_PROXY_URL")
                .map_or_else(|| DEFAULT_PROXY_BASE.to_string(), ToOwned::to_owned),
            online: match snapshot.var("LTX_ONLINE") {
                Some(value) => {
                    let lowered = value.to_ascii_lowercase();
                    !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
                }
                None => true,
            },
            retry_limit: snapshot
                .var("LTX_RETRY_LIMIT")
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_LIMIT),
        })
    }
}
