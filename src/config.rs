//! Container configuration
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! source_mode = "index-first"
//! bundle_dir = "/games/poe/Bundles2"
//! index_path = "/games/poe/Bundles2/_.index.bin"
//! read_workers = 8
//! ```

use crate::core::error::{GgpkError, Result};
use crate::core::ggpk::{GgpkOptions, DEFAULT_MAX_CONTAINER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Order in which the container's two lookup sources are consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Record tree first, bundle index as fallback
    #[default]
    TreeFirst,
    /// Bundle index first, record tree as fallback
    IndexFirst,
    /// Record tree only
    TreeOnly,
    /// Bundle index only
    IndexOnly,
}

impl SourceMode {
    pub fn uses_tree(&self) -> bool {
        !matches!(self, SourceMode::IndexOnly)
    }

    pub fn uses_index(&self) -> bool {
        !matches!(self, SourceMode::TreeOnly)
    }

    pub fn index_first(&self) -> bool {
        matches!(self, SourceMode::IndexFirst | SourceMode::IndexOnly)
    }
}

impl std::str::FromStr for SourceMode {
    type Err = GgpkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tree-first" => Ok(SourceMode::TreeFirst),
            "index-first" => Ok(SourceMode::IndexFirst),
            "tree-only" => Ok(SourceMode::TreeOnly),
            "index-only" => Ok(SourceMode::IndexOnly),
            other => Err(GgpkError::Config(format!("unknown source mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GgpkConfig {
    pub source_mode: SourceMode,

    /// Compare tree names exactly; index lookups are always case-insensitive
    pub case_sensitive: bool,

    /// Upper bound for container growth in bytes
    pub max_container_size: u64,

    /// Inflated bundles kept in memory
    pub bundle_cache_capacity: usize,

    /// Threads used by batch reads
    pub read_workers: usize,

    /// Directory of `.bundle.bin` files; bundles are read from the
    /// container when unset
    pub bundle_dir: Option<PathBuf>,

    /// Persisted bundle index; `Bundles2/_.index.bin` inside the container
    /// is tried when unset
    pub index_path: Option<PathBuf>,
}

impl Default for GgpkConfig {
    fn default() -> Self {
        Self {
            source_mode: SourceMode::TreeFirst,
            case_sensitive: false,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
            bundle_cache_capacity: 16,
            read_workers: 4,
            bundle_dir: None,
            index_path: None,
        }
    }
}

impl GgpkConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GgpkConfig =
            toml::from_str(contents).map_err(|e| GgpkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&contents)?;
        debug!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GgpkError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_workers == 0 {
            return Err(GgpkError::Config("read_workers must be at least 1".to_string()));
        }
        if self.bundle_cache_capacity == 0 {
            return Err(GgpkError::Config(
                "bundle_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_container_size < 1024 {
            return Err(GgpkError::Config(format!(
                "max_container_size {} is too small to hold a container",
                self.max_container_size
            )));
        }
        Ok(())
    }

    pub fn ggpk_options(&self) -> GgpkOptions {
        GgpkOptions {
            case_sensitive: self.case_sensitive,
            max_container_size: self.max_container_size,
        }
    }
}
