//! Configuration: a TOML file plus environment overrides.
//!
//! ```toml
//! storage = "/var/lib/registry/storage"
//!
//! [storages]
//! internal = "internal-storage"
//!
//! [[uplinks]]
//! name = "npmjs"
//! url = "https://registry.npmjs.org"
//! timeout_secs = 30
//!
//! [search]
//! auth_concurrency = 32
//! merge_buffer = 32
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::merge::MERGE_CHANNEL_SIZE;
use crate::sources::http::{DEFAULT_MAX_BATCH, DEFAULT_TIMEOUT_SECS};
use crate::sources::{HttpUplink, UplinkError, UplinkSearchClient};

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_AUTH_CONCURRENCY: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables of the search pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Access checks in flight at once.
    pub auth_concurrency: usize,
    /// Capacity of the merge channel.
    pub merge_buffer: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            auth_concurrency: DEFAULT_AUTH_CONCURRENCY,
            merge_buffer: MERGE_CHANNEL_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch: Option<usize>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl UplinkConfig {
    pub fn build(&self) -> Result<Arc<dyn UplinkSearchClient>, UplinkError> {
        let uplink = HttpUplink::new(
            &self.name,
            &self.url,
            Duration::from_secs(self.timeout_secs),
            self.max_batch.unwrap_or(DEFAULT_MAX_BATCH),
        )?;
        Ok(Arc::new(uplink))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base storage directory.
    pub storage: PathBuf,
    /// Alternate storage roots, relative to `storage`.
    pub storages: BTreeMap<String, PathBuf>,
    pub uplinks: Vec<UplinkConfig>,
    pub search: SearchSettings,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("storage"),
            storages: BTreeMap::new(),
            uplinks: Vec::new(),
            search: SearchSettings::default(),
        }
    }
}

impl RegistryConfig {
    /// Load `path`, or the default config file when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error. Environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        cfg.apply_overrides(|key| dotenvy::var(key).ok());
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut cfg: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // Relative storage paths are relative to the config file.
        if cfg.storage.is_relative()
            && let Some(dir) = path.parent()
        {
            cfg.storage = dir.join(&cfg.storage);
        }
        Ok(cfg)
    }

    /// `REGISTRY_SEARCH_STORAGE`, `REGISTRY_SEARCH_AUTH_CONCURRENCY` and
    /// `REGISTRY_SEARCH_MERGE_BUFFER`; unparsable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("REGISTRY_SEARCH_STORAGE") {
            self.storage = PathBuf::from(path);
        }

        if let Some(val) = lookup("REGISTRY_SEARCH_AUTH_CONCURRENCY")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            self.search.auth_concurrency = n;
        }

        if let Some(val) = lookup("REGISTRY_SEARCH_MERGE_BUFFER")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            self.search.merge_buffer = n;
        }
    }

    pub fn build_uplinks(&self) -> Result<Vec<Arc<dyn UplinkSearchClient>>, UplinkError> {
        self.uplinks.iter().map(UplinkConfig::build).collect()
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "registry-search", "registry-search")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
